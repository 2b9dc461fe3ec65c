//! The per-method rewrite: mark, reserve, analyse, append the tail, walk the
//! body back to front decorating returns, monitors and flow invocations,
//! prepend the dispatch prologue, clean up degenerate regions, and self-check
//! the result with a second dataflow pass.

use std::fmt::Write as _;

use parse::annotations::{Annotation, InvisibleAnnotations, VisibleAnnotations};
use parse::attributes::{CodeAttribute, KnownAttribute};
use parse::classfile::ClassFile;
use parse::codec::{decode_body, MethodBody, Region};
use parse::constants;
use parse::insn::{Insn, InvokeKind, LabelId};
use parse::opcodes as op;
use parse::pool::ConstantPool;
use support::descriptor::MethodType;
use support::types::MethodKey;
use tracing::debug;

use crate::analysis::{AbstractType, Analyzer};
use crate::decorate;
use crate::dispatch;
use crate::error::{WeaveError, WeaveResult};
use crate::protocol;
use crate::resolver::FlowResolver;
use crate::summary::SummaryCache;

/// Everything the dispatch prologue needs to route one resume id back to its
/// call site: the before-invocation label, the live-local snapshot, and the
/// save counts for both halves of the buffer.
#[derive(Debug, Clone)]
pub struct ResumeDescriptor {
    pub id: u32,
    pub label: LabelId,
    pub locals: Vec<(u16, AbstractType)>,
    pub local_prims: usize,
    pub local_refs: usize,
    pub stack_prims: usize,
    pub stack_refs: usize,
}

pub struct MethodRewriter<'a> {
    pub cache: &'a SummaryCache,
    pub resolver: &'a FlowResolver,
}

impl MethodRewriter<'_> {
    pub fn rewrite(&self, class: &mut ClassFile, method_index: usize) -> WeaveResult<()> {
        let class_name = class.name().map_err(WeaveError::Input)?;
        let mut pool = class.constant_pool.clone();

        let (method_name, descriptor_string, is_static) = {
            let method = &class.methods.values[method_index];
            (
                method.name_string().map_err(WeaveError::Input)?,
                method.descriptor_string().map_err(WeaveError::Input)?,
                method.is_static(),
            )
        };
        let method_descriptor =
            MethodType::parse(descriptor_string.clone()).map_err(WeaveError::Input)?;

        let terr = |reason: String| WeaveError::transform(&class_name, &method_name, reason);

        debug!("weaving {}.{}{}", class_name, method_name, descriptor_string);

        // Step 1: the method-granularity idempotence marker
        self.mark_manual(class, method_index, &mut pool)?;

        // Steps 2 and 3: reserve the frame local, run the first analysis
        let code_attribute: CodeAttribute = class.methods.values[method_index]
            .attributes
            .known_attribute(&pool)
            .map_err(WeaveError::Input)?;
        let mut body = decode_body(&code_attribute, &pool).map_err(WeaveError::Input)?;

        let frame_local = body.max_locals;
        body.max_locals += 1;

        let analyzer = Analyzer::new(self.cache, &pool, &class_name);
        let analysis = analyzer
            .analyse(&descriptor_string, is_static, &body)
            .map_err(|e| terr(format!("{:#}", e)))?;

        // Step 4: the catch-all and return landings, covering the whole
        // original body
        let original = body.code.ids();
        let first = original[0];

        let body_start = body.code.new_label();
        body.code.insert_before(first, Insn::Label(body_start));
        let body_end = body.code.new_label();
        body.code.push_back(Insn::Label(body_end));

        let (catch_label, return_label) =
            decorate::append_tail(&mut body, frame_local, &method_descriptor.return_type);
        body.regions.push(Region {
            start: body_start,
            end: body_end,
            handler: catch_label,
            catch_type: None,
        });

        // Step 5: walk the original body last to first, so insertions never
        // shift an unvisited position
        let mut descriptors: Vec<ResumeDescriptor> = Vec::new();
        let mut next_invocation = 1u32;

        for &at in original.iter().rev() {
            let insn = body.code.get(at).clone();
            // Unreachable code gets no frame and stays untouched
            let frame = analysis.frame_at(at);

            match insn {
                Insn::Op(opcode) if op::is_return(opcode) => {
                    let Some(frame) = frame else { continue };
                    decorate::rewrite_return(&mut body, at, frame, return_label)
                        .map_err(|e| terr(format!("{:#}", e)))?;
                }
                Insn::Op(op::MONITORENTER) => {
                    if frame.is_some() {
                        decorate::decorate_monitor(&mut body, at, frame_local, true);
                    }
                }
                Insn::Op(op::MONITOREXIT) => {
                    if frame.is_some() {
                        decorate::decorate_monitor(&mut body, at, frame_local, false);
                    }
                }
                Insn::Invoke {
                    kind,
                    owner,
                    name,
                    descriptor,
                    ..
                } => {
                    let key = MethodKey::new(&owner, &name, &descriptor);
                    if !self.resolver.is_flow_call(&key)? {
                        continue;
                    }
                    let Some(frame) = frame else { continue };

                    let callee = MethodType::parse(descriptor.clone())
                        .map_err(WeaveError::Input)?;
                    let resume = decorate::decorate_call_site(
                        &mut body,
                        at,
                        frame,
                        frame_local,
                        next_invocation,
                        return_label,
                        &method_descriptor,
                        &callee,
                        kind == InvokeKind::Static,
                    )
                    .map_err(|e| terr(format!("at call to {}: {:#}", key, e)))?;

                    descriptors.push(resume);
                    next_invocation += 1;
                }
                _ => {}
            }
        }

        // Step 6: the entry protocol and resume switch
        descriptors.sort_by_key(|d| d.id);
        dispatch::build_prologue(
            &mut body,
            &descriptors,
            frame_local,
            &class_name,
            &method_name,
            &descriptor_string,
            is_static,
        );

        // Step 7: a region whose start is its own any-handler routes the
        // monitor-exit throw back into itself forever; dropping it lets the
        // exception reach the new tail
        body.regions
            .retain(|r| !(r.start == r.handler && r.catch_type.is_none()));

        // Step 8: the rewrite must verify on its own output
        let post = analyzer
            .analyse(&descriptor_string, is_static, &body)
            .map_err(|e| {
                terr(format!(
                    "self-check failed: {:#}\n{}",
                    e,
                    instruction_trace(&body)
                ))
            })?;

        if post.max_stack_words > u16::MAX as usize {
            return Err(terr("operand stack exceeds 65535 slots".to_string()));
        }
        body.max_stack = post.max_stack_words as u16;

        // Offsets moved; these tables are stale now
        body.extra_attributes.remove(constants::STACK_MAP_TABLE);
        body.extra_attributes.remove(constants::LOCAL_VARIABLE_TABLE);
        body.extra_attributes
            .remove(constants::LOCAL_VARIABLE_TYPE_TABLE);

        let encoded = body
            .encode(&mut pool)
            .map_err(|e| terr(format!("{:#}", e)))?;
        let data = encoded
            .encode(&mut pool)
            .map_err(|e| terr(format!("{:#}", e)))?;
        class.methods.values[method_index]
            .attributes
            .put(&mut pool, constants::CODE, data);

        Ok(())
    }

    /// Flip `manual = true` on the method's flow annotation, creating the
    /// annotation when flow-ness was inherited. Re-running the transformer
    /// over this method now answers opt-out.
    fn mark_manual(
        &self,
        class: &mut ClassFile,
        method_index: usize,
        pool: &mut ConstantPool,
    ) -> WeaveResult<()> {
        let method = &mut class.methods.values[method_index];

        let mut visible: VisibleAnnotations = method
            .attributes
            .known_attribute(pool)
            .unwrap_or_default();
        if let Some(annotation) = visible
            .annotations
            .iter_mut()
            .find(|a| a.type_descriptor == protocol::FLOW_ANNOTATION)
        {
            annotation.set_bool_element(pool, protocol::MANUAL_ELEMENT, true);
            let data = visible.encode(pool).map_err(WeaveError::Input)?;
            method
                .attributes
                .put(pool, VisibleAnnotations::id(), data);
            return Ok(());
        }

        let mut invisible: InvisibleAnnotations = method
            .attributes
            .known_attribute(pool)
            .unwrap_or_default();
        if let Some(annotation) = invisible
            .annotations
            .iter_mut()
            .find(|a| a.type_descriptor == protocol::FLOW_ANNOTATION)
        {
            annotation.set_bool_element(pool, protocol::MANUAL_ELEMENT, true);
            let data = invisible.encode(pool).map_err(WeaveError::Input)?;
            method
                .attributes
                .put(pool, InvisibleAnnotations::id(), data);
            return Ok(());
        }

        // Flow-ness came from a supertype or interface; the marker still
        // belongs on the method we rewrote
        let mut annotation = Annotation::new(protocol::FLOW_ANNOTATION);
        annotation.set_bool_element(pool, protocol::MANUAL_ELEMENT, true);
        visible.annotations.push(annotation);
        let data = visible.encode(pool).map_err(WeaveError::Input)?;
        method
            .attributes
            .put(pool, VisibleAnnotations::id(), data);
        Ok(())
    }
}

fn instruction_trace(body: &MethodBody) -> String {
    let mut out = String::new();
    for (position, (_, insn)) in body.code.iter().enumerate() {
        let _ = writeln!(out, "  {:4}: {:?}", position, insn);
    }
    out
}
