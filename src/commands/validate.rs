use super::Context;
use crate::output::UserOutput;
use warden::config::format_duration;
use warden::{Parser as ConfigParser, RestartPolicy, Registry};

pub fn run_validate(ctx: &Context, out: &dyn UserOutput) -> anyhow::Result<()> {
    let config_path = match ctx.config_path() {
        Ok(path) => path,
        Err(e) => {
            out.error("Error: No configuration file found");
            out.warning("\nSearched for warden.yaml in:");
            out.warning(&format!(
                "  - Current directory: {}",
                std::env::current_dir()?.display()
            ));
            out.warning("  - Parent directories up to root");
            return Err(e.into());
        }
    };

    out.status(&format!("Validating {}...", config_path.display()));

    let config = match ConfigParser::new().load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            out.error("Configuration failed to load");
            return Err(e.into());
        }
    };
    config.validate()?;

    out.success("Configuration is valid\n");

    let registry = Registry::from_config(&config)?;
    let policy = RestartPolicy::from_config(&config, &registry);
    out.status(&format!("Daemons: {}", registry.len()));
    for spec in registry.iter() {
        let limits = policy.limits_for(&spec.name);
        out.status(&format!(
            "  - {} (every {}, max {} restarts per {}, cooldown {})",
            spec.name,
            format_duration(spec.get_health_check_interval()),
            limits.max_restarts,
            format_duration(limits.window),
            format_duration(limits.cooldown)
        ));
    }

    Ok(())
}
