//! Request-scoped trace context as an opaque capability object (spec §9
//! design note): it only knows how to add and read trace ids, and never
//! leaks any particular transport-library context type into the rest of
//! the codebase.

use serde::{Deserialize, Serialize};

pub const HEADER_TRACE_ID: &str = "X-Simple-Trace-Id";
pub const HEADER_SPAN_ID: &str = "X-Simple-Trace-Span-Id";
pub const HEADER_PARENT_SPAN_ID: &str = "X-Simple-Trace-Parent-Span-Id";

/// A trace id plus the current span and its parent. Cloned cheaply and
/// carried through async call chains as plain data rather than through
/// task-local or thread-local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    parent_span_id: String,
}

impl TraceContext {
    /// Starts a new trace at a request boundary (spec §6: every inbound
    /// API request gets one if it didn't carry one already).
    pub fn new_root() -> Self {
        TraceContext {
            trace_id: crate::utils::new_trace_id(),
            span_id: crate::utils::new_trace_id(),
            parent_span_id: String::new(),
        }
    }

    pub fn from_parts(trace_id: String, span_id: String, parent_span_id: String) -> Self {
        TraceContext {
            trace_id,
            span_id,
            parent_span_id,
        }
    }

    /// Derives a child context for one outbound hop (e.g. a callback POST),
    /// keeping the same trace id and making the current span the parent.
    pub fn child(&self) -> Self {
        TraceContext {
            trace_id: self.trace_id.clone(),
            span_id: crate::utils::new_trace_id(),
            parent_span_id: self.span_id.clone(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> &str {
        &self.parent_span_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let ctx = TraceContext::new_root();
        assert!(ctx.parent_span_id().is_empty());
    }

    #[test]
    fn child_keeps_trace_id_and_chains_span() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id(), root.span_id());
        assert_ne!(child.span_id(), root.span_id());
    }
}
