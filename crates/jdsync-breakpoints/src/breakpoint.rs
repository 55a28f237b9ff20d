use std::fmt;
use std::sync::Arc;

use jdsync_config::BreakpointDefaults;
use jdsync_jdi::{RequestConfig, SuspendPolicy};
use parking_lot::RwLock;

use crate::attributes::{keys, AttributeMap, AttributeStore, AttributeValue, MarkerId};
use crate::error::AttributeError;

/// Model identifier written into every breakpoint's attributes.
pub const MODEL_IDENTIFIER: &str = "jdsync.java";

/// Name and JNI signature of a method, always set together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub name: String,
    pub signature: String,
}

impl MethodRef {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
        }
    }

    /// Both parts or nothing; half a method reference is treated as unset.
    pub fn from_parts(name: Option<String>, signature: Option<String>) -> Option<Self> {
        match (name, signature) {
            (Some(name), Some(signature)) => Some(Self { name, signature }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Stops at the first executable location of a source line.
    Line,
    /// Stops at the entry location of a method. `None` is an unconfigured
    /// breakpoint that can never bind.
    MethodEntry { method: Option<MethodRef> },
}

impl BreakpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointKind::Line => "line",
            BreakpointKind::MethodEntry { .. } => "method_entry",
        }
    }

    /// Conditional expressions are a line-breakpoint capability only.
    pub fn supports_condition(&self) -> bool {
        matches!(self, BreakpointKind::Line)
    }
}

/// Engine-independent description of a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    /// Fully qualified declaring type.
    pub type_name: String,
    pub kind: BreakpointKind,
    pub line_number: Option<i32>,
    pub char_start: Option<i32>,
    pub char_end: Option<i32>,
    /// Fire on the n-th hit only.
    pub hit_count: Option<u32>,
    pub enabled: bool,
    pub registered: bool,
    pub suspend_policy: SuspendPolicy,
}

impl BreakpointSpec {
    pub fn line(type_name: impl Into<String>, line_number: i32) -> Self {
        Self {
            type_name: type_name.into(),
            kind: BreakpointKind::Line,
            line_number: Some(line_number),
            char_start: None,
            char_end: None,
            hit_count: None,
            enabled: true,
            registered: false,
            suspend_policy: SuspendPolicy::default(),
        }
    }

    pub fn method_entry(type_name: impl Into<String>, method: Option<MethodRef>) -> Self {
        Self {
            kind: BreakpointKind::MethodEntry { method },
            line_number: None,
            ..Self::line(type_name, 0)
        }
    }

    pub fn with_line_number(mut self, line_number: i32) -> Self {
        self.line_number = Some(line_number);
        self
    }

    pub fn with_char_range(mut self, char_start: i32, char_end: i32) -> Self {
        self.char_start = Some(char_start);
        self.char_end = Some(char_end);
        self
    }

    pub fn with_hit_count(mut self, hit_count: Option<u32>) -> Self {
        self.hit_count = hit_count.filter(|&n| n > 0);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_registered(mut self, registered: bool) -> Self {
        self.registered = registered;
        self
    }

    pub fn with_suspend_policy(mut self, suspend_policy: SuspendPolicy) -> Self {
        self.suspend_policy = suspend_policy;
        self
    }

    /// Applies the configured defaults for new breakpoints.
    pub fn with_defaults(self, defaults: &BreakpointDefaults) -> Self {
        self.with_suspend_policy(defaults.suspend_policy)
    }

    pub fn method(&self) -> Option<&MethodRef> {
        match &self.kind {
            BreakpointKind::MethodEntry { method } => method.as_ref(),
            BreakpointKind::Line => None,
        }
    }

    pub fn supports_condition(&self) -> bool {
        self.kind.supports_condition()
    }

    /// Attributes every request created for this breakpoint must carry.
    pub fn request_config(&self) -> RequestConfig {
        RequestConfig {
            hit_count: self.hit_count,
            suspend_policy: self.suspend_policy,
            enabled: self.enabled,
        }
    }

    pub fn to_attributes(&self) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        let mut put = |key: &str, value: AttributeValue| {
            attributes.insert(key.to_owned(), value);
        };

        put(keys::MODEL_IDENTIFIER, MODEL_IDENTIFIER.into());
        put(keys::KIND, self.kind.as_str().into());
        put(keys::ENABLED, self.enabled.into());
        put(keys::REGISTERED, self.registered.into());
        put(keys::TYPE_NAME, self.type_name.as_str().into());
        put(keys::SUSPEND_POLICY, self.suspend_policy.as_str().into());
        if let Some(line) = self.line_number {
            put(keys::LINE_NUMBER, line.into());
        }
        if let Some(start) = self.char_start {
            put(keys::CHAR_START, start.into());
        }
        if let Some(end) = self.char_end {
            put(keys::CHAR_END, end.into());
        }
        if let Some(hit_count) = self.hit_count {
            put(keys::HIT_COUNT, hit_count.into());
        }
        if let Some(method) = self.method() {
            put(keys::METHOD_NAME, method.name.as_str().into());
            put(keys::METHOD_SIGNATURE, method.signature.as_str().into());
        }
        attributes
    }

    pub fn from_attributes(
        marker: MarkerId,
        attributes: &AttributeMap,
    ) -> Result<Self, AttributeError> {
        let reader = AttributeReader { marker, attributes };

        let type_name = reader.string(keys::TYPE_NAME)?.ok_or(
            AttributeError::MissingAttribute {
                marker,
                key: keys::TYPE_NAME,
            },
        )?;
        let kind = match reader.string(keys::KIND)?.as_deref() {
            Some("line") => BreakpointKind::Line,
            Some("method_entry") => {
                let name = reader.string(keys::METHOD_NAME)?;
                let signature = reader.string(keys::METHOD_SIGNATURE)?;
                if name.is_some() != signature.is_some() {
                    tracing::warn!(
                        target: "jdsync.breakpoints",
                        %marker,
                        "method name and signature must be set together; treating as unconfigured"
                    );
                }
                BreakpointKind::MethodEntry {
                    method: MethodRef::from_parts(name, signature),
                }
            }
            Some(_) => {
                return Err(AttributeError::InvalidAttribute {
                    marker,
                    key: keys::KIND,
                })
            }
            None => {
                return Err(AttributeError::MissingAttribute {
                    marker,
                    key: keys::KIND,
                })
            }
        };

        let hit_count = match reader.int(keys::HIT_COUNT)? {
            Some(n) if n > 0 => Some(u32::try_from(n).map_err(|_| {
                AttributeError::InvalidAttribute {
                    marker,
                    key: keys::HIT_COUNT,
                }
            })?),
            _ => None,
        };
        let suspend_policy = match reader.string(keys::SUSPEND_POLICY)? {
            Some(value) => {
                SuspendPolicy::parse(&value).ok_or(AttributeError::InvalidAttribute {
                    marker,
                    key: keys::SUSPEND_POLICY,
                })?
            }
            None => SuspendPolicy::default(),
        };

        Ok(Self {
            type_name,
            kind,
            line_number: reader.i32(keys::LINE_NUMBER)?,
            char_start: reader.i32(keys::CHAR_START)?,
            char_end: reader.i32(keys::CHAR_END)?,
            hit_count,
            enabled: reader.bool(keys::ENABLED)?.unwrap_or(true),
            registered: reader.bool(keys::REGISTERED)?.unwrap_or(false),
            suspend_policy,
        })
    }
}

struct AttributeReader<'a> {
    marker: MarkerId,
    attributes: &'a AttributeMap,
}

impl AttributeReader<'_> {
    fn get<T>(
        &self,
        key: &'static str,
        extract: impl FnOnce(&AttributeValue) -> Option<T>,
    ) -> Result<Option<T>, AttributeError> {
        match self.attributes.get(key) {
            None => Ok(None),
            Some(value) => extract(value).map(Some).ok_or(AttributeError::InvalidAttribute {
                marker: self.marker,
                key,
            }),
        }
    }

    fn string(&self, key: &'static str) -> Result<Option<String>, AttributeError> {
        self.get(key, |v| v.as_str().map(str::to_owned))
    }

    fn int(&self, key: &'static str) -> Result<Option<i64>, AttributeError> {
        self.get(key, AttributeValue::as_int)
    }

    fn i32(&self, key: &'static str) -> Result<Option<i32>, AttributeError> {
        self.get(key, |v| v.as_int().and_then(|n| i32::try_from(n).ok()))
    }

    fn bool(&self, key: &'static str) -> Result<Option<bool>, AttributeError> {
        self.get(key, AttributeValue::as_bool)
    }
}

/// A persisted breakpoint.
///
/// The cached [`BreakpointSpec`] is only ever derived from the attribute
/// store: on creation, on every write and on [`Breakpoint::reload`]. Writes
/// go through the store first, so the cache cannot hold a value the store
/// never saw.
pub struct Breakpoint {
    marker: MarkerId,
    store: Arc<dyn AttributeStore>,
    cache: RwLock<BreakpointSpec>,
}

impl Breakpoint {
    /// Writes the full attribute set for a new breakpoint in one atomic save.
    ///
    /// `extra` carries caller-owned attributes (editor state, etc.); keys
    /// that collide with the breakpoint's own attributes are overwritten.
    pub fn create(
        store: Arc<dyn AttributeStore>,
        marker: MarkerId,
        spec: BreakpointSpec,
        extra: AttributeMap,
    ) -> Result<Arc<Self>, AttributeError> {
        let mut attributes = extra;
        attributes.extend(spec.to_attributes());
        store.save(marker, &attributes)?;
        Self::from_marker(store, marker)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_method_entry(
        store: Arc<dyn AttributeStore>,
        marker: MarkerId,
        type_name: &str,
        method: Option<MethodRef>,
        line_number: Option<i32>,
        char_range: Option<(i32, i32)>,
        hit_count: Option<u32>,
        register: bool,
        extra: AttributeMap,
    ) -> Result<Arc<Self>, AttributeError> {
        let mut spec = BreakpointSpec::method_entry(type_name, method)
            .with_hit_count(hit_count)
            .with_registered(register);
        if let Some(line) = line_number {
            spec = spec.with_line_number(line);
        }
        if let Some((start, end)) = char_range {
            spec = spec.with_char_range(start, end);
        }
        Self::create(store, marker, spec, extra)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_line(
        store: Arc<dyn AttributeStore>,
        marker: MarkerId,
        type_name: &str,
        line_number: i32,
        char_range: Option<(i32, i32)>,
        hit_count: Option<u32>,
        register: bool,
        extra: AttributeMap,
    ) -> Result<Arc<Self>, AttributeError> {
        let mut spec = BreakpointSpec::line(type_name, line_number)
            .with_hit_count(hit_count)
            .with_registered(register);
        if let Some((start, end)) = char_range {
            spec = spec.with_char_range(start, end);
        }
        Self::create(store, marker, spec, extra)
    }

    /// Reconstructs a breakpoint from previously persisted attributes.
    pub fn from_marker(
        store: Arc<dyn AttributeStore>,
        marker: MarkerId,
    ) -> Result<Arc<Self>, AttributeError> {
        let attributes = store
            .load(marker)?
            .ok_or(AttributeError::MissingMarker(marker))?;
        let spec = BreakpointSpec::from_attributes(marker, &attributes)?;
        Ok(Arc::new(Self {
            marker,
            store,
            cache: RwLock::new(spec),
        }))
    }

    /// Re-reads the store after an external change (e.g. storage reloaded on
    /// restart).
    pub fn reload(&self) -> Result<(), AttributeError> {
        let mut cache = self.cache.write();
        let attributes = self
            .store
            .load(self.marker)?
            .ok_or(AttributeError::MissingMarker(self.marker))?;
        *cache = BreakpointSpec::from_attributes(self.marker, &attributes)?;
        Ok(())
    }

    /// Removes the persisted attributes.
    pub fn delete(&self) -> Result<(), AttributeError> {
        self.store.remove(self.marker)
    }

    pub fn marker(&self) -> MarkerId {
        self.marker
    }

    pub fn spec(&self) -> BreakpointSpec {
        self.cache.read().clone()
    }

    pub fn type_name(&self) -> String {
        self.cache.read().type_name.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.read().enabled
    }

    pub fn hit_count(&self) -> Option<u32> {
        self.cache.read().hit_count
    }

    pub fn method_name(&self) -> Option<String> {
        self.cache.read().method().map(|m| m.name.clone())
    }

    pub fn method_signature(&self) -> Option<String> {
        self.cache.read().method().map(|m| m.signature.clone())
    }

    pub fn supports_condition(&self) -> bool {
        self.cache.read().supports_condition()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), AttributeError> {
        self.write(&[(keys::ENABLED, enabled.into())], &[])
    }

    pub fn set_registered(&self, registered: bool) -> Result<(), AttributeError> {
        self.write(&[(keys::REGISTERED, registered.into())], &[])
    }

    /// `None` (or zero) clears the hit count.
    pub fn set_hit_count(&self, hit_count: Option<u32>) -> Result<(), AttributeError> {
        match hit_count.filter(|&n| n > 0) {
            Some(n) => self.write(&[(keys::HIT_COUNT, n.into())], &[]),
            None => self.write(&[], &[keys::HIT_COUNT]),
        }
    }

    pub fn set_suspend_policy(&self, policy: SuspendPolicy) -> Result<(), AttributeError> {
        self.write(&[(keys::SUSPEND_POLICY, policy.as_str().into())], &[])
    }

    /// Sets or clears the method of a method-entry breakpoint; name and
    /// signature are always written together. Line breakpoints have no
    /// method and reject the write.
    pub fn set_method(&self, method: Option<MethodRef>) -> Result<(), AttributeError> {
        if matches!(self.cache.read().kind, BreakpointKind::Line) {
            return Err(AttributeError::InvalidAttribute {
                marker: self.marker,
                key: keys::METHOD_NAME,
            });
        }
        match method {
            Some(method) => self.write(
                &[
                    (keys::METHOD_NAME, method.name.into()),
                    (keys::METHOD_SIGNATURE, method.signature.into()),
                ],
                &[],
            ),
            None => self.write(&[], &[keys::METHOD_NAME, keys::METHOD_SIGNATURE]),
        }
    }

    fn write(
        &self,
        changes: &[(&str, AttributeValue)],
        removed: &[&str],
    ) -> Result<(), AttributeError> {
        let changes: AttributeMap = changes
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        // Held across the store write so concurrent setters apply in order.
        let mut cache = self.cache.write();
        let attributes = self.store.update(self.marker, &changes, removed)?;
        *cache = BreakpointSpec::from_attributes(self.marker, &attributes)?;
        Ok(())
    }
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("marker", &self.marker)
            .field("spec", &*self.cache.read())
            .finish()
    }
}
