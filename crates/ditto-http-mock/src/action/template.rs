//! Response templates evaluated against the matched request.

use super::ActionError;
use crate::model::{HttpRequest, HttpResponse, HttpTemplate, TemplateType};
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Renders an `httpResponseTemplate` into a response.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &HttpTemplate, request: &HttpRequest) -> Result<HttpResponse, ActionError>;
}

/// Compiled scripts kept before the cache is flushed.
const MAX_CACHED_SCRIPTS: usize = 256;

/// Rhai template engine.
///
/// The script sees the request as `request`, a map with `method`, `path`,
/// `headers`, `query`, `cookies` (first value per name) and `body` (parsed
/// when it is JSON, a string otherwise). It returns a map shaped like an
/// `httpResponse`:
///
/// ```text
/// #{ statusCode: 201, headers: #{ "x-path": request.path }, body: "created" }
/// ```
pub struct RhaiTemplateEngine {
    engine: Engine,
    scripts: Mutex<HashMap<String, Arc<AST>>>,
}

impl Default for RhaiTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiTemplateEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(1_000_000);
        engine.register_fn("timestamp_header", || -> String {
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
        });
        engine.register_fn("uuid", || -> String { uuid::Uuid::new_v4().to_string() });
        engine.register_fn("to_json", |value: Dynamic| -> String {
            serde_json::to_string(&dynamic_to_json(value)).unwrap_or_default()
        });
        Self {
            engine,
            scripts: Mutex::new(HashMap::new()),
        }
    }

    fn compile(&self, script: &str) -> Result<Arc<AST>, ActionError> {
        let mut scripts = self.scripts.lock();
        if let Some(ast) = scripts.get(script) {
            return Ok(ast.clone());
        }
        let ast = Arc::new(
            self.engine
                .compile(script)
                .map_err(|e| ActionError::Template(format!("failed to compile script: {e}")))?,
        );
        if scripts.len() >= MAX_CACHED_SCRIPTS {
            scripts.clear();
        }
        scripts.insert(script.to_string(), ast.clone());
        Ok(ast)
    }
}

impl TemplateEngine for RhaiTemplateEngine {
    fn render(&self, template: &HttpTemplate, request: &HttpRequest) -> Result<HttpResponse, ActionError> {
        match template.template_type {
            TemplateType::Rhai => {}
        }
        let ast = self.compile(&template.template)?;

        let mut scope = Scope::new();
        scope.push("request", request_map(request));
        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, ast.as_ref())
            .map_err(|e| ActionError::Template(format!("script execution error: {e}")))?;

        if result.is_unit() {
            return Err(ActionError::Template("script returned no response".to_string()));
        }
        let mut value = dynamic_to_json(result);
        let Value::Object(object) = &mut value else {
            return Err(ActionError::Template("script must return a map".to_string()));
        };
        for field in ["headers", "cookies"] {
            if let Some(Value::Object(entries)) = object.get_mut(field) {
                for (_, v) in entries.iter_mut() {
                    stringify_scalars(v);
                }
            }
        }
        debug!("Template produced response: {}", value);
        serde_json::from_value(value).map_err(|e| ActionError::Template(format!("invalid response: {e}")))
    }
}

fn request_map(request: &HttpRequest) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(request.method.clone()));
    map.insert("path".into(), Dynamic::from(request.path.clone()));

    for (field, values) in [
        ("headers", &request.headers),
        ("query", &request.query_string_parameters),
        ("cookies", &request.cookies),
    ] {
        let mut entries = Map::new();
        for kv in values.iter() {
            let first = kv.values.first().map(|v| v.value().to_string()).unwrap_or_default();
            entries.insert(kv.name.value().into(), Dynamic::from(first));
        }
        map.insert(field.into(), Dynamic::from(entries));
    }

    let body = match request.body_str() {
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(json @ (Value::Object(_) | Value::Array(_))) => json_to_dynamic(json),
            _ => Dynamic::from(text.to_string()),
        },
        None => Dynamic::UNIT,
    };
    map.insert("body".into(), body);
    map
}

fn stringify_scalars(value: &mut Value) {
    match value {
        Value::Number(n) => *value = Value::String(n.to_string()),
        Value::Bool(b) => *value = Value::String(b.to_string()),
        Value::Array(items) => items.iter_mut().for_each(stringify_scalars),
        _ => {}
    }
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from(i),
            None => n.as_f64().map_or(Dynamic::UNIT, Dynamic::from),
        },
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => Dynamic::from(items.into_iter().map(json_to_dynamic).collect::<Vec<_>>()),
        Value::Object(object) => {
            let mut map = Map::new();
            for (k, v) in object {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(items) = value.clone().try_cast::<Vec<Dynamic>>() {
        Value::Array(items.into_iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        Value::Object(map.into_iter().map(|(k, v)| (k.to_string(), dynamic_to_json(v))).collect())
    } else {
        Value::String(value.to_string())
    }
}
