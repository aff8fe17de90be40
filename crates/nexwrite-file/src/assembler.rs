//! Template Walker
//!
//! Expands the declared JSON template of a job into on-disk structure. The
//! walk is depth-first; each node is handled by its `type`:
//!
//! - `group`: created under the current parent, attributes written,
//!   children walked recursively
//! - `dataset`: created with its declared or inferred element type and its
//!   `values` written
//! - `stream`: no file object is created; a [`StreamPlaceholder`] is
//!   collected for the job to bind a writer module to the *parent* group
//! - `link`: collected as a [`PendingLink`] and resolved by a second pass at
//!   finalization, after every other object exists
//!
//! Errors at a single node are logged and the walk continues: the file
//! should come out as complete as possible. Only file-level failures
//! propagate to the caller.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dtype::{DType, DatasetValues};
use crate::error::Result;
use crate::file::{Group, NexusFile};

/// Maximum nesting depth accepted for `values` arrays.
const MAX_VALUE_DEPTH: usize = 10;

/// Chunk hint used for datasets declared `"unlimited"`.
const DEFAULT_CHUNK: usize = 1024;

/// A `stream` template node: the writer module named in `config` will
/// populate the group at `hdf_path`.
#[derive(Debug, Clone)]
pub struct StreamPlaceholder {
    pub hdf_path: String,
    pub config: Value,
}

/// A `link` template node, deferred to the finalization pass.
#[derive(Debug, Clone)]
pub struct PendingLink {
    pub parent_path: String,
    pub name: String,
    pub target: String,
}

/// Everything the walk produced besides file objects.
#[derive(Debug, Default)]
pub struct AssembledTemplate {
    pub placeholders: Vec<StreamPlaceholder>,
    pub links: Vec<PendingLink>,
}

/// Walk the template and create the declared structure under the file root.
pub fn assemble(file: &NexusFile, template: &Value) -> Result<AssembledTemplate> {
    let mut out = AssembledTemplate::default();
    let root = file.root();
    if let Some(children) = template.get("children").and_then(Value::as_array) {
        for child in children {
            walk_node(&root, child, &mut out);
        }
    } else {
        warn!("template has no children array, writing an empty file");
    }
    Ok(out)
}

fn walk_node(parent: &Group, node: &Value, out: &mut AssembledTemplate) {
    let object = match node.as_object() {
        Some(o) => o,
        None => {
            warn!(parent = %parent.path(), "template node is not an object, skipping");
            return;
        }
    };
    let kind = object.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "group" => walk_group(parent, object, out),
        "dataset" => {
            if let Err(e) = create_dataset(parent, object) {
                warn!(parent = %parent.path(), error = %e, "skipping dataset node");
            }
        }
        "stream" => {
            let config = object
                .get("stream")
                .cloned()
                .unwrap_or_else(|| Value::Object(object.clone()));
            out.placeholders.push(StreamPlaceholder {
                hdf_path: parent.path().to_string(),
                config,
            });
        }
        "link" => {
            let name = object.get("name").and_then(Value::as_str);
            let target = object.get("target").and_then(Value::as_str);
            match (name, target) {
                (Some(name), Some(target)) => out.links.push(PendingLink {
                    parent_path: parent.path().to_string(),
                    name: name.to_string(),
                    target: target.to_string(),
                }),
                _ => warn!(
                    parent = %parent.path(),
                    "link node missing name or target, skipping"
                ),
            }
        }
        other => {
            warn!(
                parent = %parent.path(),
                kind = other,
                "unknown template node type, skipping"
            );
        }
    }
}

fn walk_group(parent: &Group, object: &Map<String, Value>, out: &mut AssembledTemplate) {
    let name = match object.get("name").and_then(Value::as_str) {
        Some(n) if !n.is_empty() => n,
        _ => {
            warn!(parent = %parent.path(), "group node without a name, skipping");
            return;
        }
    };
    let group = match parent.create_group(name) {
        Ok(g) => g,
        Err(e) => {
            warn!(parent = %parent.path(), group = name, error = %e, "skipping group node");
            return;
        }
    };
    write_attributes(&group, object.get("attributes"));
    if let Some(children) = object.get("children").and_then(Value::as_array) {
        for child in children {
            walk_node(&group, child, out);
        }
    }
}

/// Attributes appear either as an object (`{"NX_class": "NXentry"}`) or as
/// an array of `{"name": ..., "values": ...}` entries.
fn write_attributes(group: &Group, attributes: Option<&Value>) {
    match attributes {
        None => {}
        Some(Value::Object(entries)) => {
            for (name, value) in entries {
                group.write_attribute(name, value.clone());
            }
        }
        Some(Value::Array(entries)) => {
            for entry in entries {
                let name = entry.get("name").and_then(Value::as_str);
                let values = entry.get("values").or_else(|| entry.get("value"));
                match (name, values) {
                    (Some(name), Some(values)) => group.write_attribute(name, values.clone()),
                    _ => warn!(
                        group = %group.path(),
                        "attribute entry missing name or values, skipping"
                    ),
                }
            }
        }
        Some(_) => {
            warn!(group = %group.path(), "attributes are neither object nor array, skipping");
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DatasetNodeError {
    #[error("dataset node without a name")]
    NoName,
    #[error("unsupported dataset space {0:?}")]
    UnsupportedSpace(String),
    #[error("unknown dataset type {0:?}")]
    UnknownType(String),
    #[error("values nested deeper than {MAX_VALUE_DEPTH}")]
    TooDeep,
    #[error("values array is ragged")]
    Ragged,
    #[error("values mix incompatible element types")]
    MixedTypes,
    #[error("value {0} does not fit dataset type {1}")]
    OutOfRange(String, &'static str),
    #[error(transparent)]
    File(#[from] crate::error::Error),
}

fn create_dataset(parent: &Group, object: &Map<String, Value>) -> std::result::Result<(), DatasetNodeError> {
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or(DatasetNodeError::NoName)?;

    let decl = object.get("dataset").and_then(Value::as_object);

    if let Some(space) = decl
        .and_then(|s| s.get("space"))
        .and_then(Value::as_str)
        .filter(|s| *s != "simple")
    {
        return Err(DatasetNodeError::UnsupportedSpace(space.to_string()));
    }

    let declared = match decl.and_then(|s| s.get("type")).and_then(Value::as_str) {
        Some(t) => Some(DType::parse(t).ok_or_else(|| DatasetNodeError::UnknownType(t.to_string()))?),
        None => None,
    };

    let string_size = decl
        .and_then(|s| s.get("string_size"))
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    let unlimited = match decl.and_then(|s| s.get("size")) {
        Some(Value::String(s)) => s == "unlimited",
        Some(Value::Array(dims)) => dims.first().and_then(Value::as_str) == Some("unlimited"),
        _ => false,
    };

    let values = object.get("values").cloned().unwrap_or(Value::Null);
    let (leaves, dims) = flatten_values(&values)?;
    let dtype = declared.unwrap_or_else(|| infer_dtype(&leaves));
    let storage = collect_values(&leaves, dtype)?;

    if unlimited {
        create_unlimited(parent, name, dtype, &dims, &storage)?;
    } else {
        let dims = if dims.is_empty() { vec![storage.len()] } else { dims };
        parent.create_fixed_dataset(name, storage, dims, string_size)?;
    }
    write_dataset_attributes(parent, name, object.get("attributes"));
    debug!(parent = %parent.path(), dataset = name, dtype = dtype.name(), "created dataset");
    Ok(())
}

fn create_unlimited(
    parent: &Group,
    name: &str,
    dtype: DType,
    dims: &[usize],
    storage: &DatasetValues,
) -> std::result::Result<(), DatasetNodeError> {
    macro_rules! chunked {
        ($ty:ty, $variant:ident) => {{
            let ds = parent.create_chunked_1d::<$ty>(name, DEFAULT_CHUNK)?;
            if let DatasetValues::$variant(items) = storage {
                if !items.is_empty() {
                    ds.append(items)?;
                }
            }
        }};
    }
    if dims.len() > 1 {
        warn!(
            parent = %parent.path(),
            dataset = name,
            "unlimited dataset with multi-dimensional seed values, flattening"
        );
    }
    match dtype {
        DType::UInt8 => chunked!(u8, UInt8),
        DType::UInt16 => chunked!(u16, UInt16),
        DType::UInt32 => chunked!(u32, UInt32),
        DType::UInt64 => chunked!(u64, UInt64),
        DType::Int8 => chunked!(i8, Int8),
        DType::Int16 => chunked!(i16, Int16),
        DType::Int32 => chunked!(i32, Int32),
        DType::Int64 => chunked!(i64, Int64),
        DType::Float => chunked!(f32, Float),
        DType::Double => chunked!(f64, Double),
        DType::String => chunked!(String, String),
    }
    Ok(())
}

/// Flatten a scalar-or-nested-array `values` entry into leaves plus the
/// shape of the nesting, rejecting ragged or overly deep arrays.
fn flatten_values(values: &Value) -> std::result::Result<(Vec<Value>, Vec<usize>), DatasetNodeError> {
    fn recurse(
        value: &Value,
        depth: usize,
        dims: &mut Vec<usize>,
        leaves: &mut Vec<Value>,
    ) -> std::result::Result<(), DatasetNodeError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(DatasetNodeError::TooDeep);
        }
        match value {
            Value::Array(items) => {
                match dims.get(depth) {
                    Some(expected) if *expected != items.len() => {
                        return Err(DatasetNodeError::Ragged);
                    }
                    Some(_) => {}
                    None => dims.push(items.len()),
                }
                for item in items {
                    recurse(item, depth + 1, dims, leaves)?;
                }
            }
            Value::Null => {}
            leaf => leaves.push(leaf.clone()),
        }
        Ok(())
    }
    let mut dims = Vec::new();
    let mut leaves = Vec::new();
    recurse(values, 0, &mut dims, &mut leaves)?;
    Ok((leaves, dims))
}

/// If no type was declared: floats promote to double, integers to int64,
/// strings to string.
fn infer_dtype(leaves: &[Value]) -> DType {
    if leaves.iter().any(Value::is_string) {
        DType::String
    } else if leaves.iter().any(|v| v.is_f64() || v.is_boolean()) {
        DType::Double
    } else {
        // Integers (and the empty case) default to int64.
        let all_float_free = leaves.iter().all(|v| v.is_i64() || v.is_u64());
        if all_float_free {
            DType::Int64
        } else {
            DType::Double
        }
    }
}

fn collect_values(
    leaves: &[Value],
    dtype: DType,
) -> std::result::Result<DatasetValues, DatasetNodeError> {
    fn as_i128(v: &Value) -> Option<i128> {
        v.as_i64()
            .map(i128::from)
            .or_else(|| v.as_u64().map(i128::from))
    }
    macro_rules! ints {
        ($ty:ty, $variant:ident) => {{
            let mut items: Vec<$ty> = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                let wide = as_i128(leaf)
                    .ok_or_else(|| DatasetNodeError::MixedTypes)?;
                let narrow = <$ty>::try_from(wide).map_err(|_| {
                    DatasetNodeError::OutOfRange(leaf.to_string(), stringify!($ty))
                })?;
                items.push(narrow);
            }
            DatasetValues::$variant(items)
        }};
    }
    let storage = match dtype {
        DType::UInt8 => ints!(u8, UInt8),
        DType::UInt16 => ints!(u16, UInt16),
        DType::UInt32 => ints!(u32, UInt32),
        DType::UInt64 => ints!(u64, UInt64),
        DType::Int8 => ints!(i8, Int8),
        DType::Int16 => ints!(i16, Int16),
        DType::Int32 => ints!(i32, Int32),
        DType::Int64 => ints!(i64, Int64),
        DType::Float => {
            let mut items = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                items.push(leaf.as_f64().ok_or(DatasetNodeError::MixedTypes)? as f32);
            }
            DatasetValues::Float(items)
        }
        DType::Double => {
            let mut items = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                items.push(leaf.as_f64().ok_or(DatasetNodeError::MixedTypes)?);
            }
            DatasetValues::Double(items)
        }
        DType::String => {
            let mut items = Vec::with_capacity(leaves.len());
            for leaf in leaves {
                items.push(
                    leaf.as_str()
                        .map(str::to_string)
                        .ok_or(DatasetNodeError::MixedTypes)?,
                );
            }
            DatasetValues::String(items)
        }
    };
    Ok(storage)
}

fn write_dataset_attributes(parent: &Group, dataset: &str, attributes: Option<&Value>) {
    let entries: Vec<(String, Value)> = match attributes {
        None => return,
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|entry| {
                let name = entry.get("name").and_then(Value::as_str)?;
                let values = entry.get("values").or_else(|| entry.get("value"))?;
                Some((name.to_string(), values.clone()))
            })
            .collect(),
        Some(_) => return,
    };
    for (name, value) in entries {
        if let Err(e) = parent.write_dataset_attribute(dataset, &name, value) {
            warn!(dataset, error = %e, "failed to write dataset attribute");
        }
    }
}

/// Second pass: materialize link nodes whose targets now exist. Targets may
/// be absolute or use `../` to step up from the link's parent group.
pub fn resolve_links(file: &NexusFile, links: &[PendingLink]) {
    for link in links {
        let absolute = match absolute_target(&link.parent_path, &link.target) {
            Some(p) => p,
            None => {
                warn!(
                    parent = %link.parent_path,
                    target = %link.target,
                    "link target steps above the root, skipping"
                );
                continue;
            }
        };
        if !file.node_exists(&absolute) {
            warn!(
                parent = %link.parent_path,
                name = %link.name,
                target = %absolute,
                "cannot find target object for link, skipping"
            );
            continue;
        }
        let parent = match file.lookup_group(&link.parent_path) {
            Ok(g) => g,
            Err(e) => {
                warn!(parent = %link.parent_path, error = %e, "link parent vanished, skipping");
                continue;
            }
        };
        if let Err(e) = parent.create_link(&link.name, &absolute) {
            warn!(
                parent = %link.parent_path,
                name = %link.name,
                error = %e,
                "cannot create link"
            );
        }
    }
}

/// Resolve a link target against its parent path. `../` steps up; a leading
/// `/` makes the target absolute. A bare name resolves as a sibling of the
/// link, i.e. a child of the parent group.
fn absolute_target(parent_path: &str, target: &str) -> Option<String> {
    if let Some(stripped) = target.strip_prefix('/') {
        return Some(format!("/{stripped}"));
    }
    let mut base: Vec<&str> = parent_path.split('/').filter(|p| !p.is_empty()).collect();
    let mut rest = target;
    while let Some(stripped) = rest.strip_prefix("../") {
        base.pop()?;
        rest = stripped;
    }
    let mut path = String::from("/");
    for part in base {
        path.push_str(part);
        path.push('/');
    }
    path.push_str(rest);
    Some(path.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_file(dir: &tempfile::TempDir) -> NexusFile {
        NexusFile::create_exclusive(dir.path().join("t.nxs")).unwrap()
    }

    // ---------------------------------------------------------------
    // Groups and attributes
    // ---------------------------------------------------------------

    #[test]
    fn test_groups_created_along_parent_chain() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "entry", "children": [
                {"type": "group", "name": "instrument"}
            ]}
        ]});
        assemble(&file, &template).unwrap();
        assert!(file.node_exists("/entry/instrument"));
    }

    #[test]
    fn test_attributes_object_form() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "entry", "attributes": {"NX_class": "NXentry"}}
        ]});
        assemble(&file, &template).unwrap();
        let entry = file.lookup_group("/entry").unwrap();
        assert_eq!(entry.attribute("NX_class"), Some(json!("NXentry")));
    }

    #[test]
    fn test_attributes_array_form() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "entry",
             "attributes": [{"name": "NX_class", "values": "NXentry"}]}
        ]});
        assemble(&file, &template).unwrap();
        let entry = file.lookup_group("/entry").unwrap();
        assert_eq!(entry.attribute("NX_class"), Some(json!("NXentry")));
    }

    // ---------------------------------------------------------------
    // Datasets
    // ---------------------------------------------------------------

    #[test]
    fn test_dataset_with_declared_type() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "counts",
             "dataset": {"type": "uint32"}, "values": [1, 2, 3]}
        ]});
        assemble(&file, &template).unwrap();
        assert_eq!(
            file.dataset_values("/counts").unwrap(),
            DatasetValues::UInt32(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_dataset_integer_inference_defaults_to_int64() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "n", "values": [-1, 0, 1]}
        ]});
        assemble(&file, &template).unwrap();
        assert_eq!(
            file.dataset_values("/n").unwrap(),
            DatasetValues::Int64(vec![-1, 0, 1])
        );
    }

    #[test]
    fn test_dataset_floats_promote_to_double() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "x", "values": [1.5, 2.5]}
        ]});
        assemble(&file, &template).unwrap();
        assert_eq!(
            file.dataset_values("/x").unwrap(),
            DatasetValues::Double(vec![1.5, 2.5])
        );
    }

    #[test]
    fn test_dataset_scalar_string() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "title", "values": "my run"}
        ]});
        assemble(&file, &template).unwrap();
        assert_eq!(
            file.dataset_values("/title").unwrap(),
            DatasetValues::String(vec!["my run".to_string()])
        );
    }

    #[test]
    fn test_dataset_unsupported_space_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "odd",
             "dataset": {"space": "scalar"}, "values": [1]},
            {"type": "dataset", "name": "fine", "values": [1]}
        ]});
        assemble(&file, &template).unwrap();
        assert!(!file.node_exists("/odd"));
        assert!(file.node_exists("/fine"));
    }

    #[test]
    fn test_dataset_unlimited_is_appendable() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "t",
             "dataset": {"type": "uint64", "size": "unlimited"}, "values": [5]}
        ]});
        assemble(&file, &template).unwrap();
        let ds = file.root().open_chunked_1d::<u64>("t").unwrap();
        assert_eq!(ds.append(&[6]).unwrap(), 1);
    }

    #[test]
    fn test_ragged_values_skipped_without_aborting_walk() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "ragged", "values": [[1, 2], [3]]},
            {"type": "group", "name": "entry"}
        ]});
        assemble(&file, &template).unwrap();
        assert!(!file.node_exists("/ragged"));
        assert!(file.node_exists("/entry"));
    }

    #[test]
    fn test_two_dimensional_fixed_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "dataset", "name": "m",
             "dataset": {"type": "double", "size": [2, 2]},
             "values": [[1.0, 2.0], [3.0, 4.0]]}
        ]});
        assemble(&file, &template).unwrap();
        assert_eq!(
            file.dataset_values("/m").unwrap(),
            DatasetValues::Double(vec![1.0, 2.0, 3.0, 4.0])
        );
    }

    // ---------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------

    #[test]
    fn test_stream_node_emits_placeholder_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "entry", "children": [
                {"type": "stream", "stream":
                    {"topic": "T", "source": "S", "writer_module": "f142", "type": "double"}}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        assert_eq!(assembled.placeholders.len(), 1);
        let placeholder = &assembled.placeholders[0];
        assert_eq!(placeholder.hdf_path, "/entry");
        assert_eq!(placeholder.config["writer_module"], "f142");
        let entry = file.lookup_group("/entry").unwrap();
        assert!(entry.child_names().is_empty());
    }

    #[test]
    fn test_one_placeholder_per_stream_node() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "a", "children": [
                {"type": "stream", "stream": {"topic": "T", "source": "s1", "writer_module": "f142"}}
            ]},
            {"type": "group", "name": "b", "children": [
                {"type": "stream", "stream": {"topic": "T", "source": "s2", "writer_module": "ev42"}}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        assert_eq!(assembled.placeholders.len(), 2);
    }

    // ---------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------

    #[test]
    fn test_link_resolution_with_parent_step() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "a", "children": [
                {"type": "group", "name": "b"},
                {"type": "link", "name": "alias", "target": "../a/b"}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        assert_eq!(assembled.links.len(), 1);
        resolve_links(&file, &assembled.links);
        assert_eq!(file.lookup_group("/a/alias").unwrap().path(), "/a/b");
    }

    #[test]
    fn test_link_sibling_target() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "a", "children": [
                {"type": "group", "name": "b"},
                {"type": "link", "name": "alias", "target": "b"}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        resolve_links(&file, &assembled.links);
        assert_eq!(file.lookup_group("/a/alias").unwrap().path(), "/a/b");
    }

    #[test]
    fn test_unresolvable_link_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "group", "name": "a", "children": [
                {"type": "link", "name": "alias", "target": "../nowhere"}
            ]}
        ]});
        let assembled = assemble(&file, &template).unwrap();
        resolve_links(&file, &assembled.links);
        assert!(!file.node_exists("/a/alias"));
    }

    #[test]
    fn test_absolute_target_helper() {
        assert_eq!(absolute_target("/a", "../b"), Some("/b".to_string()));
        assert_eq!(absolute_target("/a/b", "../../c"), Some("/c".to_string()));
        assert_eq!(absolute_target("/a", "/x/y"), Some("/x/y".to_string()));
        assert_eq!(absolute_target("/a", "b"), Some("/a/b".to_string()));
        assert_eq!(absolute_target("/", "../x"), None);
    }

    // ---------------------------------------------------------------
    // Robustness
    // ---------------------------------------------------------------

    #[test]
    fn test_unknown_node_type_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let template = json!({"children": [
            {"type": "wormhole", "name": "x"},
            {"type": "group", "name": "entry"}
        ]});
        assemble(&file, &template).unwrap();
        assert!(file.node_exists("/entry"));
    }

    #[test]
    fn test_template_without_children_is_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let assembled = assemble(&file, &json!({})).unwrap();
        assert!(assembled.placeholders.is_empty());
        assert!(file.root().child_names().is_empty());
    }

    #[test]
    fn test_depth_cap_rejects_pathological_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let file = new_file(&dir);
        let mut values = json!(1);
        for _ in 0..12 {
            values = json!([values]);
        }
        let template = json!({"children": [
            {"type": "dataset", "name": "deep", "values": values}
        ]});
        assemble(&file, &template).unwrap();
        assert!(!file.node_exists("/deep"));
    }
}
