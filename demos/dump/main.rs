use std::sync::Arc;

use prefab_core::{
    config::Configs,
    config_store::{ConfigSource, ConfigStore},
    context::NamedContext,
    resolver::{Resolver, ResolverConfig},
    Context,
};

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure env_logger to see Prefab logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("prefab")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "test-data/configs.json".to_owned());
    let configs = Configs::from_json(&std::fs::read(&path)?)?;
    if configs.failed_count() > 0 {
        println!("Skipping {} configs that failed to parse", configs.failed_count());
    }

    let store = Arc::new(ConfigStore::new());
    let applied = store.apply_configs(configs, ConfigSource::LocalFile);
    println!("Applied {applied} configs from {path} (highwater mark {})", store.highwater_mark());

    // PREFAB_ENVIRONMENT_ID and PREFAB_NAMESPACE select the rows that apply.
    let resolver = Resolver::new(store, ResolverConfig::from_env()?);
    print!("{}", resolver.dump());

    let context = Context::new().with_named(
        NamedContext::new("user")
            .with("key", "demo-user")
            .with("email", "demo@example.com"),
    );
    for key in resolver.keys() {
        match resolver.get(key.as_str(), &context) {
            Ok(Some(evaluation)) => println!("{key} = {}", serde_json::to_string(&evaluation)?),
            Ok(None) => println!("{key} has no value for the demo user"),
            Err(err) => println!("{key} failed: {err}"),
        }
    }

    Ok(())
}
