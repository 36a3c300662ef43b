//! Process-wide message type registry.
//!
//! Descriptors are parsed lazily on first reference, cached forever, and
//! never mutated. The registry is empty at process start and has no
//! teardown. First-time resolution of a `(type, role)` key is coalesced:
//! each key owns a [`tokio::sync::OnceCell`], so concurrent callers await a
//! single parse instead of racing. A failed resolution leaves the cell
//! unset, so later callers retry.
//!
//! Schema text is located from two sources, in order:
//! 1. text registered programmatically via [`TypeRegistry::register_schema`];
//! 2. the filesystem, searching each `ROS_PACKAGE_PATH` entry for
//!    `<pkg>/msg/<Name>.msg` (messages) or `<pkg>/srv/<Name>.srv` (services).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use futures_util::future::{BoxFuture, try_join_all};
use roslink_types::RosError;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::descriptor::{MessageDescriptor, Role};
use crate::field::{FieldDescriptor, FieldKind};
use crate::digest;
use crate::schema::{Declaration, normalize_type_name, parse_line, split_document};

type CacheKey = (String, Role);

/// Registry of resolved message types. The process-wide instance is reached
/// through [`global`]; tests build their own with [`TypeRegistry::new`].
pub struct TypeRegistry {
    /// Programmatically registered schema text, keyed by full type name.
    sources: RwLock<HashMap<String, String>>,
    /// One cell per `(type, role)`; the cell coalesces in-flight parses.
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<MessageDescriptor>>>>>,
}

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

/// The process-wide registry shared by every topic endpoint.
pub fn global() -> &'static TypeRegistry {
    GLOBAL.get_or_init(TypeRegistry::new)
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Register schema text for `type_name` (e.g. `"std_msgs/String"`).
    /// Registered text takes precedence over the filesystem. For service
    /// types, register the combined request+response document once.
    pub fn register_schema(&self, type_name: &str, text: &str) {
        let full = normalize_type_name(type_name, "");
        self.sources
            .write()
            .expect("schema source lock poisoned")
            .insert(full, text.to_string());
    }

    /// Resolve `type_name` in `role`, parsing and caching on first use.
    pub fn resolve<'a>(
        &'a self,
        type_name: &str,
        role: Role,
    ) -> BoxFuture<'a, Result<Arc<MessageDescriptor>, RosError>> {
        let full = normalize_type_name(type_name, "");
        Box::pin(async move {
            let cell = {
                let mut cells = self.cells.lock().expect("type cache lock poisoned");
                cells
                    .entry((full.clone(), role))
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };
            let descriptor = cell
                .get_or_try_init(|| self.parse_type(full.clone(), role))
                .await?;
            Ok(descriptor.clone())
        })
    }

    /// Resolve several message type names concurrently.
    pub async fn resolve_many(
        &self,
        type_names: &[&str],
    ) -> Result<Vec<Arc<MessageDescriptor>>, RosError> {
        try_join_all(
            type_names
                .iter()
                .map(|name| self.resolve(name, Role::Message)),
        )
        .await
    }

    async fn parse_type(
        &self,
        full_name: String,
        role: Role,
    ) -> Result<Arc<MessageDescriptor>, RosError> {
        let (package, name) = match full_name.split_once('/') {
            Some((p, n)) => (p.to_string(), n.to_string()),
            None => (String::new(), full_name.clone()),
        };

        let text = self.locate(&full_name, &package, &name, role).await?;
        let body = split_document(&text, role);

        let mut constants = Vec::new();
        let mut fields = Vec::new();
        for line in body.lines() {
            match parse_line(line, &package)? {
                None => {}
                Some(Declaration::Constant(c)) => constants.push(c),
                Some(Declaration::PrimitiveField {
                    name,
                    type_name,
                    ty,
                    array,
                }) => fields.push(FieldDescriptor {
                    name,
                    type_name,
                    kind: FieldKind::Primitive(ty),
                    array,
                }),
                Some(Declaration::MessageField {
                    name,
                    type_name,
                    base_type,
                    array,
                }) => {
                    let nested = self.resolve(&base_type, Role::Message).await?;
                    fields.push(FieldDescriptor {
                        name,
                        type_name,
                        kind: FieldKind::Message(nested),
                        array,
                    });
                }
            }
        }

        let digest = digest::compute(&constants, &fields);
        debug!(type_name = %full_name, role = ?role, digest = %digest, "resolved message type");
        Ok(Arc::new(MessageDescriptor {
            package,
            name,
            full_name,
            role,
            fields,
            constants,
            digest,
            text: body,
        }))
    }

    async fn locate(
        &self,
        full_name: &str,
        package: &str,
        name: &str,
        role: Role,
    ) -> Result<String, RosError> {
        if let Some(text) = self
            .sources
            .read()
            .expect("schema source lock poisoned")
            .get(full_name)
        {
            return Ok(text.clone());
        }

        if !package.is_empty() {
            let (subdir, ext) = match role {
                Role::Message => ("msg", "msg"),
                Role::Request | Role::Response => ("srv", "srv"),
            };
            let search = std::env::var("ROS_PACKAGE_PATH").unwrap_or_default();
            for root in search.split(':').filter(|p| !p.is_empty()) {
                let path: PathBuf = [root, package, subdir, &format!("{name}.{ext}")]
                    .iter()
                    .collect();
                if let Ok(text) = tokio::fs::read_to_string(&path).await {
                    return Ok(text);
                }
            }
        }

        Err(RosError::SchemaNotFound {
            type_name: full_name.to_string(),
        })
    }
}
