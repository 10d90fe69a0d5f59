//! Configuration model: raw config definitions as delivered by sources, and the values they
//! evaluate to.
mod models;
mod value;

pub use models::*;
pub use value::EvaluatedValue;

/// Convert a config key to the name of the environment variable that overrides it: uppercase,
/// with every non-alphanumeric character replaced by `_`.
///
/// ```
/// # use prefab_core::config::env_var_name;
/// assert_eq!(env_var_name("my-app.db.pool_size"), "MY_APP_DB_POOL_SIZE");
/// ```
pub fn env_var_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
