use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use wrench_core::config::AppConfig;
use wrench_core::FlowError;
use wrench_slack::socket::{NoopSocketTransport, ReconnectPolicy, SocketModeRunner};
use wrench_slack::{App, InteractionFlow};

use crate::wizard::{define_wizard, WizardState};

pub struct Application {
    pub config: AppConfig,
    pub app: App,
    pub wizard: Arc<InteractionFlow<WizardState>>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("flow registration failed: {0}")]
    Flow(#[from] FlowError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let app = App::default();
    let wizard = define_wizard(config.flows.default_ttl())(&app)?;
    info!(
        event_name = "system.bootstrap.flows_registered",
        correlation_id = "bootstrap",
        flows = ?app.flow_registry().names(),
        listeners = app.listener_count(),
        "interaction flows registered"
    );

    let slack_runner = SocketModeRunner::new(
        Arc::new(NoopSocketTransport),
        app.clone(),
        ReconnectPolicy::from(&config.socket),
    );

    Ok(Application { config, app, wizard, slack_runner })
}

#[cfg(test)]
mod tests {
    use wrench_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap_with_config;
    use crate::wizard::FLOW_NAME;

    fn valid_config() -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                slack_app_token: Some("xapp-test".to_string()),
                slack_bot_token: Some("xoxb-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn bootstrap_registers_the_wizard_flow() {
        let application = bootstrap_with_config(valid_config()).expect("bootstrap should succeed");

        assert!(application.app.flow_registry().contains(FLOW_NAME));
        assert_eq!(application.wizard.name(), FLOW_NAME);
        assert_eq!(application.wizard.interaction_names(), vec!["next", "cancel", "details"]);
        // next, cancel, details and the /wizard command
        assert_eq!(application.app.listener_count(), 4);

        application.slack_runner.start().await.expect("noop transport closes cleanly");
    }

    #[test]
    fn configured_ttl_does_not_change_registration() {
        let mut config = valid_config();
        config.flows.default_ttl_secs = 0;

        let application = bootstrap_with_config(config).expect("bootstrap without ttl");

        assert_eq!(application.app.flow_registry().names(), vec![FLOW_NAME.to_owned()]);
    }
}
