//! Selectors narrowing which objects are listed and watched.
//!
//! Field selectors use the API server's syntax: a comma separated conjunction of
//! `path=value`, `path==value` or `path!=value` terms. Label selectors are passed
//! through to the server untouched.

use serde::{Deserialize, Serialize};

use crate::{Error, ResourceItem, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Exact namespace; `None` selects all namespaces.
    pub namespace: Option<String>,
    pub field_selector: Option<String>,
    pub label_selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    /// Dotted JSON path, e.g. `metadata.name` or `status.phase`.
    pub path: String,
    pub op: FieldOp,
    pub value: String,
}

impl FieldRequirement {
    fn parse(term: &str) -> Result<Self> {
        let (path, op, value) = if let Some((p, v)) = term.split_once("!=") {
            (p, FieldOp::NotEq, v)
        } else if let Some((p, v)) = term.split_once("==") {
            (p, FieldOp::Eq, v)
        } else if let Some((p, v)) = term.split_once('=') {
            (p, FieldOp::Eq, v)
        } else {
            return Err(Error::Config(format!("invalid field selector term {term:?}: missing operator")));
        };
        let path = path.trim();
        if path.is_empty() {
            return Err(Error::Config(format!("invalid field selector term {term:?}: empty field path")));
        }
        Ok(Self { path: path.to_string(), op, value: value.trim().to_string() })
    }

    fn matches(&self, obj: &serde_json::Value) -> bool {
        let actual = lookup(obj, &self.path);
        match self.op {
            FieldOp::Eq => actual == self.value,
            FieldOp::NotEq => actual != self.value,
        }
    }
}

// Missing fields compare as the empty string, same as the API server.
fn lookup(obj: &serde_json::Value, path: &str) -> String {
    let mut cur = obj;
    for seg in path.split('.') {
        match cur.get(seg) {
            Some(next) => cur = next,
            None => return String::new(),
        }
    }
    match cur {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Selector {
    pub fn all() -> Self { Self::default() }

    pub fn namespaced(ns: &str) -> Self {
        Self { namespace: Some(ns.to_string()), ..Self::default() }
    }

    #[must_use]
    pub fn fields(mut self, field_selector: &str) -> Self {
        self.field_selector = Some(field_selector.to_string());
        self
    }

    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Parse the field selector into its conjunctive terms. Empty terms are ignored.
    pub fn field_requirements(&self) -> Result<Vec<FieldRequirement>> {
        let Some(expr) = self.field_selector.as_deref() else { return Ok(Vec::new()) };
        expr.split(',').map(str::trim).filter(|t| !t.is_empty()).map(FieldRequirement::parse).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ns) = self.namespace.as_deref() {
            if ns.trim().is_empty() {
                return Err(Error::Config("namespace must not be empty; omit it to select all namespaces".into()));
            }
        }
        self.field_requirements().map(|_| ())
    }

    /// Evaluate namespace and field requirements locally. Label selectors are not evaluated.
    pub fn matches(&self, item: &ResourceItem) -> bool {
        if let Some(ns) = self.namespace.as_deref() {
            if item.namespace.as_deref() != Some(ns) {
                return false;
            }
        }
        let reqs = match self.field_requirements() {
            Ok(r) => r,
            Err(_) => return false,
        };
        if reqs.is_empty() {
            return true;
        }
        let Ok(raw) = serde_json::to_value(&item.object) else { return false };
        reqs.iter().all(|r| r.matches(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KubeObject;
    use k8s_openapi::api::core::v1::{Pod, PodSpec};

    fn item(ns: &str, name: &str, node: Option<&str>) -> ResourceItem {
        let mut p = Pod::default();
        p.metadata.namespace = Some(ns.to_string());
        p.metadata.name = Some(name.to_string());
        p.metadata.resource_version = Some("1".into());
        p.spec = Some(PodSpec { node_name: node.map(str::to_string), ..PodSpec::default() });
        ResourceItem::from_object(KubeObject::Pod(p)).expect("item")
    }

    #[test]
    fn parses_conjunctive_terms() {
        let sel = Selector::all().fields("metadata.name=a, spec.nodeName!=n1,status.phase==Running,");
        let reqs = sel.field_requirements().expect("ok");
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0], FieldRequirement { path: "metadata.name".into(), op: FieldOp::Eq, value: "a".into() });
        assert_eq!(reqs[1].op, FieldOp::NotEq);
        assert_eq!(reqs[2].value, "Running");
    }

    #[test]
    fn rejects_malformed_terms() {
        assert!(matches!(Selector::all().fields("metadata.name").validate(), Err(Error::Config(_))));
        assert!(matches!(Selector::all().fields("=a").validate(), Err(Error::Config(_))));
        assert!(Selector { namespace: Some(" ".into()), ..Selector::default() }.validate().is_err());
        assert!(Selector::all().validate().is_ok());
    }

    #[test]
    fn matches_namespace_and_fields() {
        let a = item("default", "a", Some("n1"));
        let b = item("kube-system", "b", None);

        assert!(Selector::namespaced("default").matches(&a));
        assert!(!Selector::namespaced("default").matches(&b));
        assert!(Selector::all().matches(&b));

        assert!(Selector::all().fields("metadata.name=a").matches(&a));
        assert!(!Selector::all().fields("metadata.name=a").matches(&b));
        assert!(Selector::all().fields("spec.nodeName!=n1").matches(&b));
        assert!(!Selector::all().fields("spec.nodeName!=n1").matches(&a));
        // missing field compares as ""
        assert!(Selector::all().fields("spec.nodeName=").matches(&b));
        assert!(!Selector::all().fields("bogus").matches(&a));
    }
}
