// Code units (classes) and their methods

use serde::{Deserialize, Serialize};

use super::body::MethodBody;
use super::types::{MethodRef, Type};

/// One method; abstract and native methods carry no body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Type>,
    pub ret: Type,
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl Method {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            body: None,
        }
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Reference to this method as declared by `owner`
    pub fn reference(&self, owner: &str) -> MethodRef {
        MethodRef {
            class: owner.to_string(),
            name: self.name.clone(),
            params: self.params.clone(),
            ret: self.ret.clone(),
        }
    }

    /// Qualified signature `<owner: ret name(params)>`
    pub fn signature(&self, owner: &str) -> String {
        self.reference(owner).to_string()
    }
}

/// One loaded class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl CodeUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method_by_name(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Total statements across all method bodies
    pub fn statement_count(&self) -> usize {
        self.methods
            .iter()
            .filter_map(|m| m.body.as_ref())
            .map(MethodBody::len)
            .sum()
    }
}
