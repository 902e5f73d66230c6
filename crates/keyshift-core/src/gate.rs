//! Decides whether unified secrets should move into the secrets plugin.

use crate::error::GateError;

/// Feature toggle that enables the secrets store plugin.
pub const PLUGIN_FEATURE_TOGGLE: &str = "secretsStorePlugin";

/// Predicate consulted before every migration attempt.
pub trait MigrationGate: Send + Sync {
    /// `Ok(())` when the migration should run.
    ///
    /// # Errors
    ///
    /// Returns a [`GateError`] naming why the migration is disabled.
    fn should_migrate(&self) -> Result<(), GateError>;
}

/// Secrets plugin settings the gate looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginSettings {
    /// Whether the `secretsStorePlugin` feature toggle is on.
    pub feature_enabled: bool,
    /// Whether the operator selected the plugin as the secrets store.
    pub use_plugin: bool,
    /// Id of the installed secrets manager plugin, if any.
    pub installed_plugin: Option<String>,
}

/// Gate that opens once the remote secrets plugin is enabled, selected and
/// installed.
#[derive(Debug, Clone)]
pub struct PluginGate {
    settings: PluginSettings,
}

impl PluginGate {
    #[must_use]
    pub fn new(settings: PluginSettings) -> Self {
        Self { settings }
    }
}

impl MigrationGate for PluginGate {
    fn should_migrate(&self) -> Result<(), GateError> {
        if !self.settings.feature_enabled {
            return Err(GateError::FeatureDisabled {
                toggle: PLUGIN_FEATURE_TOGGLE.to_owned(),
            });
        }
        if !self.settings.use_plugin {
            return Err(GateError::PluginNotSelected);
        }
        match self.settings.installed_plugin.as_deref() {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(GateError::PluginNotInstalled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> PluginSettings {
        PluginSettings {
            feature_enabled: true,
            use_plugin: true,
            installed_plugin: Some("acme-secrets".to_owned()),
        }
    }

    #[test]
    fn fully_configured_plugin_opens_gate() {
        assert_eq!(PluginGate::new(enabled()).should_migrate(), Ok(()));
    }

    #[test]
    fn feature_toggle_is_checked_first() {
        let settings = PluginSettings {
            feature_enabled: false,
            ..PluginSettings::default()
        };
        assert_eq!(
            PluginGate::new(settings).should_migrate(),
            Err(GateError::FeatureDisabled {
                toggle: PLUGIN_FEATURE_TOGGLE.to_owned()
            })
        );
    }

    #[test]
    fn unselected_plugin_keeps_gate_closed() {
        let settings = PluginSettings {
            use_plugin: false,
            ..enabled()
        };
        assert_eq!(
            PluginGate::new(settings).should_migrate(),
            Err(GateError::PluginNotSelected)
        );
    }

    #[test]
    fn missing_or_blank_plugin_id_keeps_gate_closed() {
        for installed in [None, Some(String::new())] {
            let settings = PluginSettings {
                installed_plugin: installed,
                ..enabled()
            };
            assert_eq!(
                PluginGate::new(settings).should_migrate(),
                Err(GateError::PluginNotInstalled)
            );
        }
    }
}
