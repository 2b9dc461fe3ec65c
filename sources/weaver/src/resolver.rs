use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use support::types::MethodKey;
use tracing::debug;

use crate::error::{WeaveError, WeaveResult};
use crate::summary::SummaryCache;

/// Answers the one question the rewriter keeps asking: is this callee a flow
/// method? Walks the owner's declaration chain through supertypes and
/// interfaces, memoizing the final answer per method key.
pub struct FlowResolver {
    cache: Arc<SummaryCache>,
    reserved: Vec<String>,
    answers: RwLock<HashMap<MethodKey, bool>>,
}

impl FlowResolver {
    pub fn new(cache: Arc<SummaryCache>, reserved: Vec<String>) -> Self {
        Self {
            cache,
            reserved,
            answers: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_reserved(&self, internal_name: &str) -> bool {
        self.reserved.iter().any(|p| internal_name.starts_with(p))
    }

    /// Whether a call site targets a flow method. Constructors and class
    /// initialisers never are; reserved package roots are short-circuited so
    /// the platform library is never walked.
    pub fn is_flow_call(&self, key: &MethodKey) -> WeaveResult<bool> {
        if key.is_initialiser() || self.is_reserved(key.owner()) {
            return Ok(false);
        }

        {
            let answers = self.answers.read();
            if let Some(answer) = answers.get(key) {
                return Ok(*answer);
            }
        }

        let answer = self.resolve_on_owner(key)?;
        debug!("{} resolves to flow={}", key, answer);

        let mut answers = self.answers.write();
        answers.insert(key.clone(), answer);
        Ok(answer)
    }

    /// Rule 4 of the resolution order: if the exact key is not declared on
    /// the owner, substitute the supertype and try again. Descriptor matching
    /// stays strict throughout; erasure already happened.
    fn resolve_on_owner(&self, key: &MethodKey) -> WeaveResult<bool> {
        let mut owner = key.owner().to_string();

        loop {
            if self.is_reserved(&owner) {
                return Ok(false);
            }

            let summary = self
                .cache
                .summary(&owner)
                .ok_or_else(|| WeaveError::ClassResolution(owner.clone()))?;

            if summary.locate(key.name(), key.descriptor()).is_some() {
                return Ok(self
                    .annotated_in_hierarchy(&owner, key.name(), key.descriptor())?
                    .unwrap_or(false));
            }

            match &summary.super_name {
                Some(super_name) => owner = super_name.clone(),
                None => return Ok(false),
            }
        }
    }

    /// Probe the overridable chain of `class` (itself, supertypes, declared
    /// interfaces, transitively) for a declaration of the method that
    /// carries the flow annotation. The first carrier decides; a carrier
    /// with `manual = true` is the opt-out.
    pub fn annotated_in_hierarchy(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> WeaveResult<Option<bool>> {
        let mut visited = HashSet::new();
        self.probe(class, name, descriptor, &mut visited)
    }

    fn probe(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        visited: &mut HashSet<String>,
    ) -> WeaveResult<Option<bool>> {
        if self.is_reserved(class) || !visited.insert(class.to_string()) {
            return Ok(None);
        }

        let summary = self
            .cache
            .summary(class)
            .ok_or_else(|| WeaveError::ClassResolution(class.to_string()))?;

        if let Some(method) = summary.locate(name, descriptor) {
            if method.carries_flow_annotation() {
                return Ok(Some(!method.flow_manual));
            }
        }

        if let Some(super_name) = &summary.super_name {
            if let Some(found) = self.probe(super_name, name, descriptor, visited)? {
                return Ok(Some(found));
            }
        }

        for interface in summary.interfaces.iter() {
            if let Some(found) = self.probe(interface, name, descriptor, visited)? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}
