//! Configuration merger.
//!
//! # Responsibilities
//! - Merge a patch over the application's snapshot and return the result
//! - Turn each recognized option of the patch into registry operations
//! - Degrade to a warning when a middleware provider is missing or refuses
//!
//! # Design Decisions
//! - Validation first: every recognized option is checked before any side
//!   effect, so an invalid patch leaves pipeline and snapshot untouched
//! - Only options present in the patch trigger side effects
//! - Side effects run in `keys::APPLY_ORDER`, independent of patch order

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::App;
use crate::config::loader::ConfigError;
use crate::config::schema::{keys, ConfigPatch, ConfigSnapshot};
use crate::middleware::providers::{Feature, ProviderSet};
use crate::middleware::registry::MiddlewareRegistry;
use crate::routing::matcher::normalize_path;
use crate::routing::pipeline::Pipeline;

/// Registry group of the body parser pair.
pub const BODY_PARSER_GROUP: &str = "bodyParser";
pub const BODY_PARSER_JSON: &str = "bodyParser.json";
pub const BODY_PARSER_FORM: &str = "bodyParser.urlencoded";

pub const CORS_KEY: &str = "cors";
pub const HELMET_KEY: &str = "helmet";
pub const STATIC_KEY: &str = "static";
pub const LOGGER_KEY: &str = "logger";

/// Settings written by the `views` option.
pub const VIEW_ENGINE_SETTING: &str = "view engine";
pub const VIEWS_SETTING: &str = "views";

/// The parts of an application the merger works on.
pub(crate) struct MergeTarget<'a> {
    pub pipeline: &'a Pipeline,
    pub registry: &'a mut MiddlewareRegistry,
    pub providers: &'a ProviderSet,
    pub snapshot: &'a mut ConfigSnapshot,
    pub root_dir: &'a Path,
}

#[derive(Debug)]
enum BodyParserStep {
    Remove,
    Ensure,
    Replace(Value),
}

#[derive(Debug)]
enum Step {
    BodyParser(BodyParserStep),
    Feature {
        feature: Feature,
        key: &'static str,
        options: Option<Value>,
    },
    Static(Option<StaticTarget>),
    Views { engine: String, dir: PathBuf },
}

#[derive(Debug)]
struct StaticTarget {
    dir: PathBuf,
    mount: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticObject {
    dir: String,
    mount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ViewsObject {
    engine: String,
    path: String,
}

/// Merge `patch` into the application's configuration.
pub fn apply_config(app: &mut App, patch: ConfigPatch) -> Result<ConfigSnapshot, ConfigError> {
    apply(app.merge_target(), patch)
}

pub(crate) fn apply(mut target: MergeTarget<'_>, patch: ConfigPatch) -> Result<ConfigSnapshot, ConfigError> {
    let (steps, stored) = plan(&patch, target.root_dir)?;

    for step in steps {
        run_step(&mut target, step);
    }
    for (key, value) in stored {
        target.snapshot.insert(key, value);
    }
    Ok(target.snapshot.clone())
}

/// Validate the patch and work out what to do, without touching anything.
fn plan(patch: &ConfigPatch, root_dir: &Path) -> Result<(Vec<Step>, Vec<(String, Value)>), ConfigError> {
    let mut steps = Vec::new();
    for key in keys::APPLY_ORDER {
        let Some(value) = patch.get(key) else {
            continue;
        };
        match key {
            keys::BODY_PARSER => steps.push(Step::BodyParser(match value {
                Value::Bool(false) => BodyParserStep::Remove,
                Value::Object(_) => BodyParserStep::Replace(value.clone()),
                _ => BodyParserStep::Ensure,
            })),
            keys::CORS => steps.push(Step::Feature {
                feature: Feature::Cors,
                key: CORS_KEY,
                options: object_toggle(key, value)?,
            }),
            keys::HELMET => steps.push(Step::Feature {
                feature: Feature::Helmet,
                key: HELMET_KEY,
                options: object_toggle(key, value)?,
            }),
            keys::STATIC => steps.push(Step::Static(static_target(value, root_dir)?)),
            keys::LOGS => steps.push(Step::Feature {
                feature: Feature::Logger,
                key: LOGGER_KEY,
                options: logger_options(value)?,
            }),
            keys::VIEWS => {
                let views: ViewsObject = serde_json::from_value(value.clone())
                    .map_err(|e| ConfigError::invalid(key, e.to_string()))?;
                steps.push(Step::Views {
                    engine: views.engine,
                    dir: root_dir.join(views.path),
                });
            }
            // Port has no side effect beyond the coerced stored value.
            _ => {}
        }
    }

    let mut stored = Vec::with_capacity(patch.len());
    for (key, value) in patch.iter() {
        let value = if key == keys::PORT {
            coerce_port(value)?
        } else {
            value.clone()
        };
        if !keys::APPLY_ORDER.contains(&key.as_str()) {
            tracing::debug!(option = %key, "Unrecognized option stored without side effect");
        }
        stored.push((key.clone(), value));
    }
    Ok((steps, stored))
}

fn run_step(target: &mut MergeTarget<'_>, step: Step) {
    match step {
        Step::BodyParser(BodyParserStep::Remove) => {
            let removed = target.registry.remove_group(target.pipeline, BODY_PARSER_GROUP);
            tracing::info!(removed, "Body parsers disabled by configuration");
        }
        Step::BodyParser(BodyParserStep::Ensure) => install_body_parsers(target, &Value::Null, false),
        Step::BodyParser(BodyParserStep::Replace(options)) => {
            install_body_parsers(target, &options, true)
        }
        Step::Feature {
            feature,
            key,
            options: Some(options),
        } => match target.providers.build(feature, &options) {
            Ok(handler) => {
                target.registry.install(target.pipeline, key, handler, None);
                tracing::info!(feature = %feature, "Middleware enabled by configuration");
            }
            Err(e) => tracing::warn!(feature = %feature, error = %e, "Middleware skipped"),
        },
        Step::Feature {
            feature,
            key,
            options: None,
        } => {
            if target.registry.remove(target.pipeline, key) {
                tracing::info!(feature = %feature, "Middleware disabled by configuration");
            }
        }
        Step::Static(Some(static_target)) => {
            let options = json!({ "dir": static_target.dir.to_string_lossy() });
            match target.providers.build(Feature::Static, &options) {
                Ok(handler) => {
                    target.registry.install(
                        target.pipeline,
                        STATIC_KEY,
                        handler,
                        static_target.mount.as_deref(),
                    );
                    tracing::info!(
                        dir = %static_target.dir.display(),
                        mount = static_target.mount.as_deref().unwrap_or("/"),
                        "Static files served"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "Static files skipped"),
            }
        }
        Step::Static(None) => {
            if target.registry.remove(target.pipeline, STATIC_KEY) {
                tracing::info!("Static files disabled by configuration");
            }
        }
        Step::Views { engine, dir } => {
            tracing::debug!(engine = %engine, dir = %dir.display(), "View settings updated");
            target
                .pipeline
                .set_setting(VIEW_ENGINE_SETTING, Value::String(engine));
            target.pipeline.set_setting(
                VIEWS_SETTING,
                Value::String(dir.to_string_lossy().into_owned()),
            );
        }
    }
}

/// Install the JSON and form parsers. Without `replace`, parsers already
/// tracked stay as they are.
pub(crate) fn install_body_parsers(target: &mut MergeTarget<'_>, options: &Value, replace: bool) {
    let pair = [
        (BODY_PARSER_JSON, Feature::JsonParser),
        (BODY_PARSER_FORM, Feature::FormParser),
    ];
    for (key, feature) in pair {
        if !replace && target.registry.is_live(target.pipeline, key) {
            continue;
        }
        match target.providers.build(feature, options) {
            Ok(handler) => {
                target.registry.install(target.pipeline, key, handler, None);
            }
            Err(e) => tracing::warn!(feature = %feature, error = %e, "Body parser skipped"),
        }
    }
}

/// JavaScript-style truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `true` → `{}`, an object → itself, falsy → off.
fn object_toggle(key: &str, value: &Value) -> Result<Option<Value>, ConfigError> {
    if !truthy(value) {
        return Ok(None);
    }
    match value {
        Value::Bool(true) => Ok(Some(json!({}))),
        Value::Object(_) => Ok(Some(value.clone())),
        _ => Err(ConfigError::invalid(key, "expected a boolean or an options table")),
    }
}

fn logger_options(value: &Value) -> Result<Option<Value>, ConfigError> {
    if !truthy(value) {
        return Ok(None);
    }
    match value {
        Value::Bool(true) => Ok(Some(Value::Null)),
        Value::String(format) => Ok(Some(json!({ "format": format }))),
        Value::Object(_) => Ok(Some(value.clone())),
        _ => Err(ConfigError::invalid(
            keys::LOGS,
            "expected a boolean, a format name or an options table",
        )),
    }
}

fn static_target(value: &Value, root_dir: &Path) -> Result<Option<StaticTarget>, ConfigError> {
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::String(dir) if dir.is_empty() => Ok(None),
        Value::String(dir) => Ok(Some(StaticTarget {
            dir: root_dir.join(dir),
            mount: None,
        })),
        Value::Object(_) => {
            let object: StaticObject = serde_json::from_value(value.clone())
                .map_err(|e| ConfigError::invalid(keys::STATIC, e.to_string()))?;
            Ok(Some(StaticTarget {
                dir: root_dir.join(object.dir),
                mount: object.mount.map(|m| normalize_path(&m)),
            }))
        }
        _ => Err(ConfigError::invalid(
            keys::STATIC,
            "expected a directory, `{ dir, mount }` or false",
        )),
    }
}

/// Numbers and numeric strings become an integer port; `false`/`null` clear it.
fn coerce_port(value: &Value) -> Result<Value, ConfigError> {
    let port = match value {
        Value::Null | Value::Bool(false) => return Ok(Value::Null),
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.map(|p| json!(p))
        .ok_or_else(|| ConfigError::invalid(keys::PORT, format!("`{}` is not a valid port", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::providers::ProviderError;

    fn app() -> App {
        App::new()
    }

    fn tracked(app: &App, key: &str) -> bool {
        app.registry().is_live(app.pipeline(), key)
    }

    #[test]
    fn test_port_coercion() {
        assert_eq!(coerce_port(&json!("8080")).unwrap(), json!(8080));
        assert_eq!(coerce_port(&json!(3001)).unwrap(), json!(3001));
        assert_eq!(coerce_port(&json!(false)).unwrap(), Value::Null);
        assert!(coerce_port(&json!("abc")).is_err());
        assert!(coerce_port(&json!(70000)).is_err());
        assert!(coerce_port(&json!(-1)).is_err());
    }

    #[test]
    fn test_port_string_round_trip() {
        let mut app = app();
        let snapshot = app.apply_config(ConfigPatch::new().port("8080")).unwrap();
        assert_eq!(snapshot.get("port"), Some(&json!(8080)));
        assert_eq!(snapshot.port(), Some(8080));
    }

    #[test]
    fn test_logs_toggle() {
        let mut app = app();
        app.apply_config(ConfigPatch::new().logs(true)).unwrap();
        assert!(tracked(&app, LOGGER_KEY));

        let snapshot = app.apply_config(ConfigPatch::new().logs(false)).unwrap();
        assert!(!tracked(&app, LOGGER_KEY));
        assert!(!app.registry().contains(LOGGER_KEY));
        assert_eq!(snapshot.get("logs"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_body_parser_toggle_is_idempotent() {
        let mut app = app();
        assert!(tracked(&app, BODY_PARSER_JSON));
        let before = app.pipeline().len();

        app.apply_config(ConfigPatch::new().body_parser(true)).unwrap();
        assert_eq!(app.pipeline().len(), before);

        app.apply_config(ConfigPatch::new().body_parser(false)).unwrap();
        assert!(!tracked(&app, BODY_PARSER_JSON));
        assert!(!tracked(&app, BODY_PARSER_FORM));
        assert_eq!(app.pipeline().len(), before - 2);

        app.apply_config(ConfigPatch::new().body_parser(true)).unwrap();
        assert!(tracked(&app, BODY_PARSER_JSON));
        assert_eq!(app.pipeline().len(), before);
    }

    #[test]
    fn test_cors_twice_keeps_one_layer() {
        let mut app = app();
        app.apply_config(ConfigPatch::new().cors(true)).unwrap();
        app.apply_config(ConfigPatch::new().cors(json!({"origin": "https://a.test"})))
            .unwrap();
        let cors = app.registry().get(CORS_KEY).unwrap().handler().clone();
        let layers = app.pipeline().layers();
        assert_eq!(layers.iter().filter(|l| l.handler().ptr_eq(&cors)).count(), 1);
        assert_eq!(app.registry().entries().iter().filter(|e| e.key() == CORS_KEY).count(), 1);
    }

    #[test]
    fn test_invalid_option_has_no_side_effects() {
        let mut app = app();
        let before = app.pipeline().len();
        let err = app
            .apply_config(ConfigPatch::new().logs(true).port("abc"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref key, .. } if key == "port"));
        assert_eq!(app.pipeline().len(), before);
        assert!(app.config().get("logs").is_none());
    }

    #[test]
    fn test_unavailable_provider_is_skipped() {
        let providers = ProviderSet::default().without(Feature::Logger);
        let mut app = App::with_providers(providers);
        let snapshot = app
            .apply_config(ConfigPatch::new().logs("dev").helmet(true))
            .unwrap();
        assert!(!tracked(&app, LOGGER_KEY));
        assert!(tracked(&app, HELMET_KEY));
        assert_eq!(snapshot.get("logs"), Some(&json!("dev")));
    }

    #[test]
    fn test_provider_refusal_is_skipped() {
        let mut app = app();
        app.apply_config(ConfigPatch::new().logs("fancy")).unwrap();
        assert!(!tracked(&app, LOGGER_KEY));
        assert!(matches!(
            "fancy".parse::<crate::middleware::logger::LogFormat>(),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_unknown_options_stored_verbatim() {
        let mut app = app();
        let before = app.pipeline().len();
        let snapshot = app
            .apply_config(ConfigPatch::new().set("featureFlag", json!({"beta": true})))
            .unwrap();
        assert_eq!(snapshot.get("featureFlag"), Some(&json!({"beta": true})));
        assert_eq!(app.pipeline().len(), before);
    }

    #[test]
    fn test_merge_keeps_previous_values() {
        let mut app = app();
        app.apply_config(ConfigPatch::new().port(4000).set("name", "demo"))
            .unwrap();
        let snapshot = app.apply_config(ConfigPatch::new().port(5000)).unwrap();
        assert_eq!(snapshot.port(), Some(5000));
        assert_eq!(snapshot.get("name"), Some(&json!("demo")));
    }

    #[test]
    fn test_static_mounted_and_removed() {
        let mut app = app();
        app.apply_config(ConfigPatch::new().static_mounted("public", "/assets/"))
            .unwrap();
        let entry = app.registry().get(STATIC_KEY).unwrap();
        assert_eq!(entry.mount_path(), Some("/assets"));

        app.apply_config(ConfigPatch::new().disable_static()).unwrap();
        assert!(!app.registry().contains(STATIC_KEY));
    }

    #[test]
    fn test_invalid_static_rejected() {
        let mut app = app();
        let err = app
            .apply_config(ConfigPatch::new().set("static", 42))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_views_settings() {
        let mut app = App::new().with_root_dir("/srv/app");
        app.apply_config(ConfigPatch::new().views("tera", "templates"))
            .unwrap();
        assert_eq!(
            app.pipeline().setting(VIEW_ENGINE_SETTING),
            Some(json!("tera"))
        );
        assert_eq!(
            app.pipeline().setting(VIEWS_SETTING),
            Some(json!("/srv/app/templates"))
        );
        assert!(app
            .apply_config(ConfigPatch::new().set("views", "templates"))
            .is_err());
    }
}
