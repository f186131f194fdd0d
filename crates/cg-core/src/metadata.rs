//! Metadata registry (C2): a typed, name-keyed table of attachable
//! node/edge metadata, with per-type merge rules and a JSON round-trip
//! contract that preserves unknown keys verbatim.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CoreError, Result};
use crate::model::NodeId;

/// Distinguishes *why* a merge is happening, so a metadata type can refuse
/// to merge in a context it was never meant for (`EntryFunctionMD`, which
/// is graph-level, not node-level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    NodeMerge,
    EdgeMerge,
    None,
}

/// Translates a foreign graph's node ids into this graph's id space during
/// a merge (§4.7 pass 3). The merger supplies the real implementation; a
/// no-op identity mapping is useful for same-graph tests.
pub trait IdRemap {
    fn remap(&self, foreign: NodeId) -> Option<NodeId>;
}

pub struct IdentityRemap;
impl IdRemap for IdentityRemap {
    fn remap(&self, foreign: NodeId) -> Option<NodeId> {
        Some(foreign)
    }
}

/// A single piece of typed metadata. Implementors are registered once (by
/// key) in a `MetadataRegistry`; the registry owns (de)serialization so
/// unknown keys can be preserved without ever constructing the type.
pub trait MetadataValue: fmt::Debug + Send + Sync {
    fn type_key(&self) -> &'static str;
    fn to_json(&self, remap: &dyn IdRemap) -> serde_json::Value;
    /// Merge `other` into `self`. `other` is guaranteed (by the registry)
    /// to share `type_key()`; a mismatch here is the `MetadataTypeMismatch`
    /// programming error of §7 and should panic rather than silently
    /// corrupt state.
    fn merge_with(&mut self, other: &dyn MetadataValue, action: MergeAction, remap: &dyn IdRemap);
    fn clone_box(&self) -> Box<dyn MetadataValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn MetadataValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

type DeserializeFn = fn(&serde_json::Value, &dyn IdRemap) -> Box<dyn MetadataValue>;

/// Opaque metadata: preserved verbatim for keys the registry doesn't know
/// about. Round-trips through load/save without ever being inspected, per
/// the §7 `UnknownMetadataKey` policy.
#[derive(Debug, Clone)]
pub struct OpaqueMetadata {
    pub key: String,
    pub json: serde_json::Value,
}

impl MetadataValue for OpaqueMetadata {
    fn type_key(&self) -> &'static str {
        // Opaque values are keyed dynamically; callers match on `.key`
        // rather than `type_key()` when they need to distinguish opaque
        // entries from each other.
        "__opaque__"
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        self.json.clone()
    }

    fn merge_with(&mut self, _other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        // Unknown metadata is not merge-aware; keep the existing value,
        // matching "round-trip verbatim without inspection".
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A node's or edge's attached metadata, keyed by type key (or, for
/// unrecognized keys, the opaque key string itself).
#[derive(Debug, Default, Clone)]
pub struct MetadataMap {
    entries: BTreeMap<String, Box<dyn MetadataValue>>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Box<dyn MetadataValue>) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&dyn MetadataValue> {
        self.entries.get(key).map(|b| b.as_ref())
    }

    /// Get a mutable typed reference, constructing a default-initialized
    /// `T` if absent (§4.3 `get_or_create<T>()`).
    pub fn get_or_create<T>(&mut self, key: &'static str) -> &mut T
    where
        T: MetadataValue + Default + 'static,
    {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Box::new(T::default()));
        self.get_mut_typed(key).expect("just inserted")
    }

    fn get_mut_typed<T: MetadataValue + 'static>(&mut self, key: &str) -> Option<&mut T> {
        let entry = self.entries.get_mut(key)?;
        entry.as_any_mut().downcast_mut::<T>()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn MetadataValue>> {
        self.entries.remove(key)
    }

    /// Merge `other` into `self`, key by key, dispatching through the
    /// registry so each key uses its own merge rule.
    pub fn merge_from(
        &mut self,
        other: &MetadataMap,
        action: MergeAction,
        remap: &dyn IdRemap,
        registry: &MetadataRegistry,
    ) -> Result<()> {
        for (key, value) in other.entries.iter() {
            match self.entries.get_mut(key) {
                Some(existing) => {
                    if existing.type_key() != value.type_key() {
                        return Err(CoreError::MetadataTypeMismatch {
                            key: key.clone(),
                            expected: existing.type_key().to_string(),
                            found: value.type_key().to_string(),
                        });
                    }
                    existing.merge_with(value.as_ref(), action, remap);
                }
                None => {
                    // First time this key appears in `self`: a bare clone
                    // would carry `value`'s `NodeId`s unchanged, but those
                    // ids live in the *source* graph's id space (e.g.
                    // `OverrideMD`'s `overrides` list). Build an empty
                    // instance of the same type and merge through it so
                    // `merge_with`'s own remap still runs.
                    let mut fresh = registry.deserialize(key, &serde_json::json!({}), &IdentityRemap);
                    fresh.merge_with(value.as_ref(), action, remap);
                    self.entries.insert(key.clone(), fresh);
                }
            }
        }
        Ok(())
    }
}

/// Type-indexed registry of metadata kinds: serializers are implicit (each
/// `MetadataValue::to_json` knows how to serialize itself); the registry
/// only needs to know how to go from raw JSON back to a typed value.
pub struct MetadataRegistry {
    deserializers: BTreeMap<&'static str, DeserializeFn>,
}

static REGISTRY_INSTANCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl MetadataRegistry {
    /// Build the registry with every built-in type registered. Constructing
    /// more than one instance in a process is an ABI-mismatch symptom (§5,
    /// §9): each construction bumps a process-wide counter and logs once
    /// it exceeds one.
    pub fn new() -> Self {
        let count = REGISTRY_INSTANCE_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
        if count > 1 {
            tracing::error!(
                count,
                "multiple MetadataRegistry instances detected in this process; this usually means \
                 two copies of cg-core were linked with mismatched ABIs"
            );
        }
        let mut reg = MetadataRegistry {
            deserializers: BTreeMap::new(),
        };
        reg.register_builtins();
        reg
    }

    pub fn register<T>(&mut self, key: &'static str, deser: DeserializeFn)
    where
        T: MetadataValue,
    {
        self.deserializers.insert(key, deser);
    }

    pub fn deserialize(
        &self,
        key: &str,
        json: &serde_json::Value,
        remap: &dyn IdRemap,
    ) -> Box<dyn MetadataValue> {
        match self.deserializers.get(key) {
            Some(f) => f(json, remap),
            None => {
                tracing::warn!(key, "unknown metadata key during load; preserving opaquely");
                Box::new(OpaqueMetadata {
                    key: key.to_string(),
                    json: json.clone(),
                })
            }
        }
    }

    fn register_builtins(&mut self) {
        self.deserializers
            .insert(NumStatementsMetadata::KEY, |j, _| {
                Box::new(NumStatementsMetadata::from_json(j))
            });
        self.deserializers
            .insert(CodeStatisticsMetadata::KEY, |j, _| {
                Box::new(CodeStatisticsMetadata::from_json(j))
            });
        self.deserializers.insert(LoopDepthMetadata::KEY, |j, _| {
            Box::new(LoopDepthMetadata::from_json(j))
        });
        self.deserializers
            .insert(GlobalLoopDepthMetadata::KEY, |j, _| {
                Box::new(GlobalLoopDepthMetadata::from_json(j))
            });
        self.deserializers
            .insert(LoopCallDepthMetadata::KEY, |j, _| {
                Box::new(LoopCallDepthMetadata::from_json(j))
            });
        self.deserializers
            .insert(NumConditionalBranchMetadata::KEY, |j, _| {
                Box::new(NumConditionalBranchMetadata::from_json(j))
            });
        self.deserializers
            .insert(NumOperationsMetadata::KEY, |j, _| {
                Box::new(NumOperationsMetadata::from_json(j))
            });
        self.deserializers
            .insert(FilePropertiesMetadata::KEY, |j, _| {
                Box::new(FilePropertiesMetadata::from_json(j))
            });
        self.deserializers.insert(InlineMetadata::KEY, |j, _| {
            Box::new(InlineMetadata::from_json(j))
        });
        self.deserializers.insert(OverrideMetadata::KEY, |j, _| {
            Box::new(OverrideMetadata::from_json(j))
        });
        self.deserializers
            .insert(EntryFunctionMetadata::KEY, |j, remap| {
                Box::new(EntryFunctionMetadata::from_json(j, remap))
            });
        self.deserializers
            .insert(MallocVariableMetadata::KEY, |j, _| {
                Box::new(MallocVariableMetadata::from_json(j))
            });
        self.deserializers.insert(UniqueTypeMetadata::KEY, |j, _| {
            Box::new(UniqueTypeMetadata::from_json(j))
        });
        self.deserializers.insert(AllAliasMetadata::KEY, |j, _| {
            Box::new(AllAliasMetadata::from_json(j))
        });
        self.deserializers
            .insert(FunctionSignatureMetadata::KEY, |j, _| {
                Box::new(FunctionSignatureMetadata::from_json(j))
            });
        self.deserializers.insert(VirtualCallMetadata::KEY, |j, _| {
            Box::new(VirtualCallMetadata::from_json(j))
        });
    }
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! simple_scalar_md {
    ($name:ident, $key:literal, $field:ident : $ty:ty, $default:expr, $merge:expr, $warn_msg:literal) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub $field: $ty,
        }

        impl $name {
            pub const KEY: &'static str = $key;

            pub fn new($field: $ty) -> Self {
                $name { $field }
            }

            fn from_json(j: &serde_json::Value) -> Self {
                let $field = serde_json::from_value(j.clone()).unwrap_or($default);
                $name { $field }
            }
        }

        impl MetadataValue for $name {
            fn type_key(&self) -> &'static str {
                Self::KEY
            }

            fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
                serde_json::json!(self.$field)
            }

            fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
                let other = other
                    .as_any()
                    .downcast_ref::<$name>()
                    .expect("type_key matched but downcast failed");
                let merge_fn: fn($ty, $ty) -> $ty = $merge;
                let before = self.$field;
                self.$field = merge_fn(self.$field, other.$field);
                if before != 0 as $ty && other.$field != 0 as $ty && before != other.$field {
                    tracing::warn!($warn_msg);
                }
            }

            fn clone_box(&self) -> Box<dyn MetadataValue> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

simple_scalar_md!(
    NumStatementsMetadata,
    "numStatements",
    count: i64,
    0,
    |a, b| a + b,
    "same function defined with different number of statements found on merge"
);

simple_scalar_md!(
    LoopDepthMetadata,
    "loopDepth",
    depth: i64,
    0,
    |a, b| a.max(b),
    "unreachable: LoopDepth merge never warns"
);

simple_scalar_md!(
    NumConditionalBranchMetadata,
    "numConditionalBranches",
    count: i64,
    0,
    |a, b| a + b,
    "same function defined with different number of conditional branches found on merge"
);

simple_scalar_md!(
    UniqueTypeMetadata,
    "uniqueTypeMetaData",
    count: i64,
    0,
    |a, b| a + b,
    "same function defined with different number of types found on merge"
);

/// GlobalLoopDepth is recomputed from scratch after every merge (§4.2,
/// §4.7) rather than merged pointwise; the pointwise max here is only a
/// placeholder value used before that recompute pass runs.
#[derive(Debug, Clone, Default)]
pub struct GlobalLoopDepthMetadata {
    pub depth: i64,
}

impl GlobalLoopDepthMetadata {
    pub const KEY: &'static str = "globalLoopDepth";

    fn from_json(j: &serde_json::Value) -> Self {
        GlobalLoopDepthMetadata {
            depth: j.as_i64().unwrap_or(0),
        }
    }
}

impl MetadataValue for GlobalLoopDepthMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!(self.depth)
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        tracing::warn!(
            "GlobalLoopDepth cannot be merged pointwise; recompute it globally after merging, \
             keeping max() as a placeholder value until then"
        );
        let other = other
            .as_any()
            .downcast_ref::<GlobalLoopDepthMetadata>()
            .expect("type_key matched but downcast failed");
        self.depth = self.depth.max(other.depth);
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-called-function loop nesting depth: merge is pointwise max, union
/// of keys.
#[derive(Debug, Clone, Default)]
pub struct LoopCallDepthMetadata {
    pub depths: BTreeMap<String, i64>,
}

impl LoopCallDepthMetadata {
    pub const KEY: &'static str = "loopCallDepth";

    fn from_json(j: &serde_json::Value) -> Self {
        let depths = serde_json::from_value(j.clone()).unwrap_or_default();
        LoopCallDepthMetadata { depths }
    }
}

impl MetadataValue for LoopCallDepthMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!(self.depths)
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<LoopCallDepthMetadata>()
            .expect("type_key matched but downcast failed");
        for (callee, depth) in other.depths.iter() {
            self.depths
                .entry(callee.clone())
                .and_modify(|d| *d = (*d).max(*depth))
                .or_insert(*depth);
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Field-wise statement/variable counters, per §4.2 `CodeStatistics`.
#[derive(Debug, Clone, Default)]
pub struct CodeStatisticsMetadata {
    pub num_vars: i64,
}

impl CodeStatisticsMetadata {
    pub const KEY: &'static str = "codeStatistics";

    pub fn new(num_vars: i64) -> Self {
        CodeStatisticsMetadata { num_vars }
    }

    fn from_json(j: &serde_json::Value) -> Self {
        let num_vars = j.get("numVars").and_then(|v| v.as_i64()).unwrap_or(0);
        CodeStatisticsMetadata { num_vars }
    }
}

impl MetadataValue for CodeStatisticsMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!({ "numVars": self.num_vars })
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<CodeStatisticsMetadata>()
            .expect("type_key matched but downcast failed");
        if self.num_vars != other.num_vars {
            let before = self.num_vars;
            self.num_vars += other.num_vars;
            if before != 0 && other.num_vars != 0 {
                tracing::warn!("same function defined with a different number of variables found on merge");
            }
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Field-wise operation counters (§4.2 `NumOperations`).
#[derive(Debug, Clone, Default)]
pub struct NumOperationsMetadata {
    pub int_ops: i64,
    pub float_ops: i64,
    pub control_flow_ops: i64,
    pub memory_accesses: i64,
}

impl NumOperationsMetadata {
    pub const KEY: &'static str = "numOperations";

    fn from_json(j: &serde_json::Value) -> Self {
        let get = |k: &str| j.get(k).and_then(|v| v.as_i64()).unwrap_or(0);
        NumOperationsMetadata {
            int_ops: get("numberOfIntOps"),
            float_ops: get("numberOfFloatOps"),
            control_flow_ops: get("numberOfControlFlowOps"),
            memory_accesses: get("numberOfMemoryAccesses"),
        }
    }
}

impl MetadataValue for NumOperationsMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!({
            "numberOfIntOps": self.int_ops,
            "numberOfFloatOps": self.float_ops,
            "numberOfControlFlowOps": self.control_flow_ops,
            "numberOfMemoryAccesses": self.memory_accesses,
        })
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<NumOperationsMetadata>()
            .expect("type_key matched but downcast failed");
        let differs = self.int_ops != other.int_ops
            || self.float_ops != other.float_ops
            || self.control_flow_ops != other.control_flow_ops
            || self.memory_accesses != other.memory_accesses;
        if differs {
            let before = self.clone();
            self.int_ops += other.int_ops;
            self.float_ops += other.float_ops;
            self.control_flow_ops += other.control_flow_ops;
            self.memory_accesses += other.memory_accesses;
            let double_defined = (before.int_ops != 0 && other.int_ops != 0 && before.int_ops != other.int_ops)
                || (before.float_ops != 0 && other.float_ops != 0 && before.float_ops != other.float_ops)
                || (before.control_flow_ops != 0
                    && other.control_flow_ops != 0
                    && before.control_flow_ops != other.control_flow_ops)
                || (before.memory_accesses != 0
                    && other.memory_accesses != 0
                    && before.memory_accesses != other.memory_accesses);
            if double_defined {
                tracing::warn!("same function defined with a different number of operations found on merge");
            }
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Boolean-OR `systemInclude`, first-non-empty `origin` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct FilePropertiesMetadata {
    pub system_include: bool,
    pub origin: String,
}

impl FilePropertiesMetadata {
    pub const KEY: &'static str = "fileProperties";

    fn from_json(j: &serde_json::Value) -> Self {
        FilePropertiesMetadata {
            system_include: j.get("systemInclude").and_then(|v| v.as_bool()).unwrap_or(false),
            origin: j
                .get("origin")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl MetadataValue for FilePropertiesMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!({ "systemInclude": self.system_include, "origin": self.origin })
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<FilePropertiesMetadata>()
            .expect("type_key matched but downcast failed");
        self.system_include |= other.system_include;
        if self.origin.is_empty() {
            self.origin = other.origin.clone();
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Boolean-OR over inline flags, equality-checked `is_template` (§4.2).
#[derive(Debug, Clone, Default)]
pub struct InlineMetadata {
    pub marked_inline: bool,
    pub likely_inline: bool,
    pub always_inline: bool,
    pub is_template: bool,
}

impl InlineMetadata {
    pub const KEY: &'static str = "inlineInfo";

    fn from_json(j: &serde_json::Value) -> Self {
        let flag = |k: &str| j.get(k).and_then(|v| v.as_bool()).unwrap_or(false);
        InlineMetadata {
            marked_inline: flag("markedInline"),
            likely_inline: flag("likelyInline"),
            always_inline: flag("markedAlwaysInline"),
            is_template: flag("isTemplate"),
        }
    }
}

impl MetadataValue for InlineMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!({
            "markedInline": self.marked_inline,
            "likelyInline": self.likely_inline,
            "markedAlwaysInline": self.always_inline,
            "isTemplate": self.is_template,
        })
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<InlineMetadata>()
            .expect("type_key matched but downcast failed");
        if self.is_template != other.is_template {
            tracing::warn!("merging functions with mismatched 'isTemplate' metadata");
        }
        self.marked_inline |= other.marked_inline;
        self.likely_inline |= other.likely_inline;
        self.always_inline |= other.always_inline;
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Override hierarchy: two lists of node ids, unioned with id remap
/// (§4.2, §4.7).
#[derive(Debug, Clone, Default)]
pub struct OverrideMetadata {
    pub overrides: Vec<NodeId>,
    pub overridden_by: Vec<NodeId>,
}

impl OverrideMetadata {
    pub const KEY: &'static str = "overrideMD";

    fn from_json(j: &serde_json::Value) -> Self {
        let ids = |k: &str| -> Vec<NodeId> {
            j.get(k)
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_u64()).map(NodeId).collect())
                .unwrap_or_default()
        };
        OverrideMetadata {
            overrides: ids("overrides"),
            overridden_by: ids("overriddenBy"),
        }
    }

    fn union_remapped(existing: &[NodeId], incoming: &[NodeId], remap: &dyn IdRemap) -> Vec<NodeId> {
        let mut out = existing.to_vec();
        for id in incoming {
            if let Some(mapped) = remap.remap(*id) {
                if !out.contains(&mapped) {
                    out.push(mapped);
                }
            }
        }
        out
    }
}

impl MetadataValue for OverrideMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, remap: &dyn IdRemap) -> serde_json::Value {
        let map_ids = |ids: &[NodeId]| -> Vec<u64> {
            ids.iter().filter_map(|id| remap.remap(*id)).map(|id| id.0).collect()
        };
        serde_json::json!({
            "overrides": map_ids(&self.overrides),
            "overriddenBy": map_ids(&self.overridden_by),
        })
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<OverrideMetadata>()
            .expect("type_key matched but downcast failed");
        self.overrides = Self::union_remapped(&self.overrides, &other.overrides, remap);
        self.overridden_by = Self::union_remapped(&self.overridden_by, &other.overridden_by, remap);
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Graph-level: which node is the program entry point. Only ever merged
/// with `MergeAction::None`; merging it as node/edge metadata is a usage
/// error (§4.2).
#[derive(Debug, Clone, Default)]
pub struct EntryFunctionMetadata {
    pub entry: Option<NodeId>,
}

impl EntryFunctionMetadata {
    pub const KEY: &'static str = "entryFunction";

    fn from_json(j: &serde_json::Value, remap: &dyn IdRemap) -> Self {
        let entry = j
            .as_str()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<u64>().ok())
            .map(NodeId)
            .and_then(|id| remap.remap(id));
        EntryFunctionMetadata { entry }
    }
}

impl MetadataValue for EntryFunctionMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, remap: &dyn IdRemap) -> serde_json::Value {
        match self.entry.and_then(|id| remap.remap(id)) {
            Some(id) => serde_json::json!(id.0.to_string()),
            None => serde_json::json!(""),
        }
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, action: MergeAction, remap: &dyn IdRemap) {
        if action != MergeAction::None {
            tracing::warn!("EntryFunctionMD is graph-level metadata; merging it as node/edge metadata is a no-op");
            return;
        }
        let other = other
            .as_any()
            .downcast_ref::<EntryFunctionMetadata>()
            .expect("type_key matched but downcast failed");
        if let Some(other_entry) = other.entry {
            if self.entry.is_none() {
                self.entry = remap.remap(other_entry);
            } else {
                tracing::warn!(
                    existing = ?self.entry,
                    "both merged graphs define an entry function; keeping the existing value"
                );
            }
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `var -> alloc-statement` map. Merge is not defined for v1 (§4.2); the
/// value is preserved verbatim across a merge, same as opaque metadata.
#[derive(Debug, Clone, Default)]
pub struct MallocVariableMetadata {
    pub allocs: BTreeMap<String, String>,
}

impl MallocVariableMetadata {
    pub const KEY: &'static str = "mallocCollector";

    fn from_json(j: &serde_json::Value) -> Self {
        let mut allocs = BTreeMap::new();
        if let Some(arr) = j.as_array() {
            for entry in arr {
                if let (Some(global), Some(stmt)) = (
                    entry.get("global").and_then(|v| v.as_str()),
                    entry.get("allocStmt").and_then(|v| v.as_str()),
                ) {
                    allocs.insert(global.to_string(), stmt.to_string());
                }
            }
        }
        MallocVariableMetadata { allocs }
    }
}

impl MetadataValue for MallocVariableMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        let arr: Vec<_> = self
            .allocs
            .iter()
            .map(|(k, v)| serde_json::json!({ "global": k, "allocStmt": v }))
            .collect();
        serde_json::json!(arr)
    }

    fn merge_with(&mut self, _other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        // Merge intentionally unimplemented for v1, per the upstream TODO.
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A function's externally-visible shape, used by the merger's
/// over-approximation pass to match an indirect call's candidate set
/// against every function it could plausibly name (§4.7 pass 4). Without
/// real type information, `param_types` is a count-shaped placeholder
/// (`"?"` per parameter) rather than actual C/C++ types; this still lets
/// two functions of different arity be told apart, which is the only
/// distinction `AllAliasMetadata` needs in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionSignature {
    pub ret_type: String,
    pub param_types: Vec<String>,
}

impl FunctionSignature {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "retType": self.ret_type, "paramTypes": self.param_types })
    }

    fn from_json(j: &serde_json::Value) -> Self {
        FunctionSignature {
            ret_type: j.get("retType").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            param_types: j
                .get("paramTypes")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Every signature this node's address might be assigned to (i.e. "might
/// call" when invoked indirectly through a function pointer of that
/// shape). Populated when the source carries `--alias-model all`; see
/// `cg-merge`'s over-approximation pass.
#[derive(Debug, Clone, Default)]
pub struct AllAliasMetadata {
    pub might_call: Vec<FunctionSignature>,
}

impl AllAliasMetadata {
    pub const KEY: &'static str = "AllAliasMetadata";

    fn from_json(j: &serde_json::Value) -> Self {
        let might_call = j
            .as_array()
            .map(|arr| arr.iter().map(FunctionSignature::from_json).collect())
            .unwrap_or_default();
        AllAliasMetadata { might_call }
    }
}

impl MetadataValue for AllAliasMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!(self.might_call.iter().map(FunctionSignature::to_json).collect::<Vec<_>>())
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<AllAliasMetadata>()
            .expect("type_key matched but downcast failed");
        for sig in &other.might_call {
            if !self.might_call.contains(sig) {
                self.might_call.push(sig.clone());
            }
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// This node's own signature, attached so the merger's over-approximation
/// pass can match it against other nodes' `AllAliasMetadata`.
#[derive(Debug, Clone, Default)]
pub struct FunctionSignatureMetadata {
    pub own_signature: FunctionSignature,
}

impl FunctionSignatureMetadata {
    pub const KEY: &'static str = "FunctionSignatureMetadata";

    fn from_json(j: &serde_json::Value) -> Self {
        FunctionSignatureMetadata {
            own_signature: FunctionSignature::from_json(j),
        }
    }
}

impl MetadataValue for FunctionSignatureMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        self.own_signature.to_json()
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<FunctionSignatureMetadata>()
            .expect("type_key matched but downcast failed");
        if self.own_signature != other.own_signature {
            tracing::warn!("two merged definitions of the same function report different signatures");
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple method names (unqualified, after the last `::`) this node might
/// invoke through a virtual dispatch the per-TU solver couldn't bind to a
/// concrete decl — the base and every override typically live in a
/// different TU than the call site (§8 scenario 3). Resolved the same way
/// `AllAliasMetadata` is: `cg-merge`'s over-approximation pass matches
/// these names against every method known across the whole program once
/// all TUs are merged.
#[derive(Debug, Clone, Default)]
pub struct VirtualCallMetadata {
    pub might_call_methods: Vec<String>,
}

impl VirtualCallMetadata {
    pub const KEY: &'static str = "VirtualCallMetadata";

    fn from_json(j: &serde_json::Value) -> Self {
        let might_call_methods = j
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default();
        VirtualCallMetadata { might_call_methods }
    }
}

impl MetadataValue for VirtualCallMetadata {
    fn type_key(&self) -> &'static str {
        Self::KEY
    }

    fn to_json(&self, _remap: &dyn IdRemap) -> serde_json::Value {
        serde_json::json!(self.might_call_methods)
    }

    fn merge_with(&mut self, other: &dyn MetadataValue, _action: MergeAction, _remap: &dyn IdRemap) {
        let other = other
            .as_any()
            .downcast_ref::<VirtualCallMetadata>()
            .expect("type_key matched but downcast failed");
        for name in &other.might_call_methods {
            if !self.might_call_methods.contains(name) {
                self.might_call_methods.push(name.clone());
            }
        }
    }

    fn clone_box(&self) -> Box<dyn MetadataValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_statements_sums_and_warns_on_conflict() {
        let mut a = NumStatementsMetadata::new(3);
        let b = NumStatementsMetadata::new(4);
        a.merge_with(&b, MergeAction::NodeMerge, &IdentityRemap);
        assert_eq!(a.count, 7);
    }

    #[test]
    fn loop_depth_merges_as_max() {
        let mut a = LoopDepthMetadata::new(2);
        let b = LoopDepthMetadata::new(5);
        a.merge_with(&b, MergeAction::NodeMerge, &IdentityRemap);
        assert_eq!(a.depth, 5);
    }

    #[test]
    fn file_properties_or_and_first_nonempty_origin() {
        let mut a = FilePropertiesMetadata {
            system_include: false,
            origin: String::new(),
        };
        let b = FilePropertiesMetadata {
            system_include: true,
            origin: "a.h".to_string(),
        };
        a.merge_with(&b, MergeAction::NodeMerge, &IdentityRemap);
        assert!(a.system_include);
        assert_eq!(a.origin, "a.h");
    }

    #[test]
    fn override_metadata_unions_ids() {
        let mut a = OverrideMetadata {
            overrides: vec![NodeId(1)],
            overridden_by: vec![],
        };
        let b = OverrideMetadata {
            overrides: vec![NodeId(1), NodeId(2)],
            overridden_by: vec![NodeId(3)],
        };
        a.merge_with(&b, MergeAction::NodeMerge, &IdentityRemap);
        assert_eq!(a.overrides, vec![NodeId(1), NodeId(2)]);
        assert_eq!(a.overridden_by, vec![NodeId(3)]);
    }

    #[test]
    fn unknown_key_round_trips_opaquely() {
        let registry = MetadataRegistry::new();
        let v = serde_json::json!({"custom": true});
        let boxed = registry.deserialize("notBuiltin", &v, &IdentityRemap);
        assert_eq!(boxed.to_json(&IdentityRemap), v);
    }

    #[test]
    fn metadata_map_merge_dispatches_per_key() {
        let registry = MetadataRegistry::new();
        let mut map_a = MetadataMap::new();
        map_a.insert(
            NumStatementsMetadata::KEY,
            Box::new(NumStatementsMetadata::new(2)),
        );
        let mut map_b = MetadataMap::new();
        map_b.insert(
            NumStatementsMetadata::KEY,
            Box::new(NumStatementsMetadata::new(3)),
        );
        map_a
            .merge_from(&map_b, MergeAction::NodeMerge, &IdentityRemap, &registry)
            .unwrap();
        let merged = map_a
            .get(NumStatementsMetadata::KEY)
            .unwrap()
            .as_any()
            .downcast_ref::<NumStatementsMetadata>()
            .unwrap();
        assert_eq!(merged.count, 5);
    }

    #[test]
    fn metadata_map_merge_remaps_ids_on_first_insert_too() {
        struct Remap;
        impl IdRemap for Remap {
            fn remap(&self, foreign: NodeId) -> Option<NodeId> {
                Some(NodeId(foreign.0 + 100))
            }
        }
        let registry = MetadataRegistry::new();
        let mut dest_map = MetadataMap::new();
        let mut src_map = MetadataMap::new();
        src_map.insert(
            OverrideMetadata::KEY,
            Box::new(OverrideMetadata { overrides: vec![NodeId(1)], overridden_by: vec![] }),
        );
        dest_map.merge_from(&src_map, MergeAction::NodeMerge, &Remap, &registry).unwrap();
        let merged = dest_map
            .get(OverrideMetadata::KEY)
            .unwrap()
            .as_any()
            .downcast_ref::<OverrideMetadata>()
            .unwrap();
        assert_eq!(merged.overrides, vec![NodeId(101)]);
    }
}
