use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use parse::annotations::{InvisibleAnnotations, VisibleAnnotations};
use parse::classfile::ClassFile;
use parse::flags::ClassFileAccessFlags;
use parse::parser::Parser;
use tracing::debug;

use crate::protocol;
use crate::provider::ClassProvider;

/// What the resolver and the analyzer need to know about a method without
/// holding its body: identity, abstractness, and which annotations it
/// carries.
#[derive(Debug, Clone)]
pub struct MethodSummary {
    pub name: String,
    pub descriptor: String,
    pub is_abstract: bool,
    /// Annotation type descriptors from both runtime-visible and
    /// runtime-invisible sets.
    pub annotations: Vec<String>,
    /// True when the flow annotation is present with `manual = true`.
    pub flow_manual: bool,
}

impl MethodSummary {
    pub fn carries_flow_annotation(&self) -> bool {
        self.annotations
            .iter()
            .any(|a| a == protocol::FLOW_ANNOTATION)
    }
}

/// The hierarchy-relevant shape of one class.
#[derive(Debug, Clone)]
pub struct ClassSummary {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub methods: Vec<MethodSummary>,
}

impl ClassSummary {
    pub fn locate(&self, name: &str, descriptor: &str) -> Option<&MethodSummary> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Summarize an already parsed class. Also used on the class currently
    /// being transformed, which the provider may not be able to see.
    pub fn of(class: &ClassFile) -> Result<Self> {
        let mut methods = Vec::with_capacity(class.methods.values.len());

        for method in class.methods.values.iter() {
            let mut annotations = Vec::new();
            let mut flow_manual = false;

            let mut collect = |set: Vec<parse::annotations::Annotation>| -> Result<()> {
                for annotation in set {
                    if annotation.type_descriptor == protocol::FLOW_ANNOTATION {
                        flow_manual = annotation
                            .bool_element(&class.constant_pool, protocol::MANUAL_ELEMENT)?
                            .unwrap_or(false);
                    }
                    annotations.push(annotation.type_descriptor);
                }
                Ok(())
            };

            if let Ok(visible) = method
                .attributes
                .known_attribute::<VisibleAnnotations>(&class.constant_pool)
            {
                collect(visible.annotations)?;
            }
            if let Ok(invisible) = method
                .attributes
                .known_attribute::<InvisibleAnnotations>(&class.constant_pool)
            {
                collect(invisible.annotations)?;
            }

            methods.push(MethodSummary {
                name: method.name_string()?,
                descriptor: method.descriptor_string()?,
                is_abstract: method.is_abstract(),
                annotations,
                flow_manual,
            });
        }

        Ok(ClassSummary {
            name: class.name()?,
            super_name: class.super_name()?,
            interfaces: class.interface_names()?,
            is_interface: class.access_flags.has(ClassFileAccessFlags::INTERFACE),
            methods,
        })
    }
}

/// Process-wide summary cache over the resource provider. Entries are
/// monotone: once a name resolves (or fails to), the answer never changes
/// for the life of the transformer. Unresolved names keep a sentinel so
/// supertype cycles terminate instead of re-querying forever.
pub struct SummaryCache {
    provider: Box<dyn ClassProvider>,
    entries: RwLock<HashMap<String, Option<Arc<ClassSummary>>>>,
}

impl SummaryCache {
    pub fn new(provider: Box<dyn ClassProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn summary(&self, internal_name: &str) -> Option<Arc<ClassSummary>> {
        {
            let entries = self.entries.read();
            if let Some(cached) = entries.get(internal_name) {
                return cached.clone();
            }
        }

        let summarized = self.summarize(internal_name);
        if summarized.is_none() {
            debug!("negative cache entry for {}", internal_name);
        }

        let mut entries = self.entries.write();
        entries
            .entry(internal_name.to_string())
            .or_insert(summarized)
            .clone()
    }

    fn summarize(&self, internal_name: &str) -> Option<Arc<ClassSummary>> {
        let bytes = self.provider.get_class(internal_name)?;
        let class = Parser::new(&bytes).parse().ok()?;
        ClassSummary::of(&class).ok().map(Arc::new)
    }
}
