//! weft's core: rewrite compiled classes so that calls between flow methods
//! become suspension/resume points backed by heap-allocated method frames.
//! The transformer never touches the filesystem on its own; `transform` maps
//! bytes to an outcome and the caller decides what to write where.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parse::parser::Parser;
use parse::writer::Writer;
use tracing::{debug, info};

pub mod analysis;
pub mod decorate;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod protocol;
pub mod provider;
pub mod resolver;
pub mod rewrite;
pub mod summary;

pub use error::{WeaveError, WeaveResult};
pub use provider::{ClassPathProvider, ClassProvider, MemoryProvider};

use guard::Inspection;
use resolver::FlowResolver;
use rewrite::MethodRewriter;
use summary::SummaryCache;

/// What became of one class container. Error outcomes arrive as the
/// [`WeaveError`] side of the result; on every non-`Transformed` path the
/// input bytes are preserved untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing in the class needs the frame protocol.
    NoFlowMethods,
    /// The idempotence sentinel is present; the input is already woven.
    AlreadyTransformed,
    /// The rewritten class image.
    Transformed(Vec<u8>),
}

/// The transformer. One instance holds the process-wide summary and
/// flow-method caches; class files can be fed through it in any order, and
/// from several threads if the provider allows concurrent reads.
pub struct Weaver {
    cache: Arc<SummaryCache>,
    resolver: FlowResolver,
}

impl Weaver {
    pub fn new(provider: Box<dyn ClassProvider>) -> Self {
        Self::with_reserved(
            provider,
            protocol::DEFAULT_RESERVED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        )
    }

    /// Reservation prefixes are package roots the resolver refuses to walk,
    /// designated once at construction.
    pub fn with_reserved(provider: Box<dyn ClassProvider>, reserved: Vec<String>) -> Self {
        let cache = Arc::new(SummaryCache::new(provider));
        let resolver = FlowResolver::new(Arc::clone(&cache), reserved);
        Self { cache, resolver }
    }

    pub fn transform(&self, bytes: &[u8]) -> WeaveResult<Outcome> {
        let mut class = Parser::new(bytes).parse().map_err(WeaveError::Input)?;
        let class_name = class.name().map_err(WeaveError::Input)?;

        let candidates = match guard::inspect(&class, &self.resolver)? {
            Inspection::AlreadyTransformed => {
                debug!("{} is already woven", class_name);
                return Ok(Outcome::AlreadyTransformed);
            }
            Inspection::NoFlowMethods => {
                debug!("{} has no flow methods", class_name);
                return Ok(Outcome::NoFlowMethods);
            }
            Inspection::Transform(candidates) => candidates,
        };

        info!("weaving {} ({} methods)", class_name, candidates.len());

        let rewriter = MethodRewriter {
            cache: &self.cache,
            resolver: &self.resolver,
        };
        for index in candidates {
            rewriter.rewrite(&mut class, index)?;
        }

        guard::mark(&mut class);

        let output = Writer::new(&class)
            .write()
            .map_err(|e| WeaveError::transform(&class_name, "", format!("{:#}", e)))?;
        Ok(Outcome::Transformed(output))
    }

    /// Convenience wrapper over a file path. The file is rewritten only on
    /// `Transformed`; every other outcome leaves it untouched.
    pub fn transform_path(&self, path: &Path) -> WeaveResult<Outcome> {
        let bytes = fs::read(path).map_err(|e| WeaveError::Input(e.into()))?;
        let outcome = self.transform(&bytes)?;

        if let Outcome::Transformed(output) = &outcome {
            fs::write(path, output).map_err(|e| WeaveError::Input(e.into()))?;
        }

        Ok(outcome)
    }
}
