use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{anyhow, Context, Result};
use parse::codec::MethodBody;
use parse::insn::{Insn, InsnId, InvokeKind, LabelId, LocalKind, PushValue};
use parse::opcodes as op;
use parse::classfile::Resolvable;
use parse::pool::{ConstantEntry, ConstantPool};
use support::descriptor::MethodType;

use super::types::{AbstractFrame, AbstractType};
use crate::protocol::OBJECT_CLASS;
use crate::summary::SummaryCache;

/// Result of one dataflow pass: the abstract frame in force immediately
/// before each reachable instruction, plus the deepest stack observed.
pub struct Analysis {
    frames: Vec<Option<AbstractFrame>>,
    pub max_stack_words: usize,
}

impl Analysis {
    /// The frame before an instruction; None when the instruction was
    /// unreachable.
    pub fn frame_at(&self, id: InsnId) -> Option<&AbstractFrame> {
        self.frames.get(id.raw()).and_then(|f| f.as_ref())
    }
}

/// How one instruction hands control onward.
enum Continuation {
    Next,
    Jump(LabelId),
    Branch(LabelId),
    Switch(Vec<LabelId>),
    End,
}

/// The forward flow analysis. Reference joins go through the summary cache
/// for least-common-supertype lookups; a class the provider cannot see joins
/// conservatively to java/lang/Object, which is the verifier's own fallback.
pub struct Analyzer<'a> {
    cache: &'a SummaryCache,
    pool: &'a ConstantPool,
    class_name: &'a str,
}

impl<'a> Analyzer<'a> {
    pub fn new(cache: &'a SummaryCache, pool: &'a ConstantPool, class_name: &'a str) -> Self {
        Self {
            cache,
            pool,
            class_name,
        }
    }

    pub fn analyse(
        &self,
        descriptor: &str,
        is_static: bool,
        body: &MethodBody,
    ) -> Result<Analysis> {
        let ids = body.code.ids();
        if ids.is_empty() {
            return Err(anyhow!("method body has no instructions"));
        }

        let position_of: HashMap<InsnId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let label_position = |label: LabelId| -> Result<usize> {
            let id = body
                .code
                .label_position(label)
                .ok_or(anyhow!("unplaced label {}", label))?;
            Ok(position_of[&id])
        };

        // Protected regions, as position ranges
        let mut handlers = Vec::with_capacity(body.regions.len());
        for region in body.regions.iter() {
            handlers.push((
                label_position(region.start)?,
                label_position(region.end)?,
                label_position(region.handler)?,
                match &region.catch_type {
                    Some(name) => AbstractType::of_internal_name(name),
                    None => AbstractType::Reference("java/lang/Throwable".to_string()),
                },
            ));
        }

        let entry = self.entry_frame(descriptor, is_static, body.max_locals as usize)?;
        let mut frames: Vec<Option<AbstractFrame>> = vec![None; ids.len()];
        let mut worklist: VecDeque<usize> = VecDeque::new();
        let mut max_stack_words = entry.stack_words();

        frames[0] = Some(entry);
        worklist.push_back(0);

        let budget = ids.len() * 256;
        let mut steps = 0;

        while let Some(position) = worklist.pop_front() {
            steps += 1;
            if steps > budget {
                return Err(anyhow!("dataflow did not converge"));
            }

            let insn = body.code.get(ids[position]);
            let before = frames[position]
                .clone()
                .ok_or(anyhow!("worklist reached an unvisited position"))?;

            // Exception edge: anything inside a region can transfer to its
            // handler with the locals as they stand before the instruction
            for (start, end, handler, caught) in handlers.iter() {
                if position >= *start && position < *end {
                    let at_handler = AbstractFrame {
                        locals: before.locals.clone(),
                        stack: vec![caught.clone()],
                    };
                    self.merge_into(&mut frames, *handler, at_handler, &mut worklist)?;
                }
            }

            let mut after = before;
            let continuation = self
                .step(insn, &mut after)
                .with_context(|| format!("at instruction {} ({:?})", position, insn))?;

            max_stack_words = max_stack_words.max(after.stack_words());

            match continuation {
                Continuation::Next => {
                    if position + 1 >= ids.len() {
                        return Err(anyhow!("control falls off the end of the method"));
                    }
                    self.merge_into(&mut frames, position + 1, after, &mut worklist)?;
                }
                Continuation::Jump(label) => {
                    self.merge_into(&mut frames, label_position(label)?, after, &mut worklist)?;
                }
                Continuation::Branch(label) => {
                    if position + 1 >= ids.len() {
                        return Err(anyhow!("control falls off the end of the method"));
                    }
                    self.merge_into(
                        &mut frames,
                        label_position(label)?,
                        after.clone(),
                        &mut worklist,
                    )?;
                    self.merge_into(&mut frames, position + 1, after, &mut worklist)?;
                }
                Continuation::Switch(labels) => {
                    for label in labels {
                        self.merge_into(
                            &mut frames,
                            label_position(label)?,
                            after.clone(),
                            &mut worklist,
                        )?;
                    }
                }
                Continuation::End => {}
            }
        }

        // Re-key from positions to instruction ids
        let mut by_id: Vec<Option<AbstractFrame>> = vec![None; body.code.id_bound()];
        for (position, frame) in frames.into_iter().enumerate() {
            by_id[ids[position].raw()] = frame;
        }

        Ok(Analysis {
            frames: by_id,
            max_stack_words,
        })
    }

    fn entry_frame(
        &self,
        descriptor: &str,
        is_static: bool,
        max_locals: usize,
    ) -> Result<AbstractFrame> {
        let mut frame = AbstractFrame::new(max_locals);
        let mut slot = 0;

        let mut assign = |frame: &mut AbstractFrame, slot: &mut usize, ty: AbstractType| -> Result<()> {
            let width = ty.width();
            if *slot + width > max_locals {
                return Err(anyhow!("parameters exceed max_locals {}", max_locals));
            }
            frame.locals[*slot] = ty;
            if width == 2 {
                frame.locals[*slot + 1] = AbstractType::Top;
            }
            *slot += width;
            Ok(())
        };

        if !is_static {
            assign(
                &mut frame,
                &mut slot,
                AbstractType::Reference(self.class_name.to_string()),
            )?;
        }

        let descriptor = MethodType::parse(descriptor.to_string())?;
        for parameter in descriptor.parameters.iter() {
            assign(&mut frame, &mut slot, AbstractType::of_field_type(parameter)?)?;
        }

        Ok(frame)
    }

    fn merge_into(
        &self,
        frames: &mut [Option<AbstractFrame>],
        position: usize,
        incoming: AbstractFrame,
        worklist: &mut VecDeque<usize>,
    ) -> Result<()> {
        match &frames[position] {
            None => {
                frames[position] = Some(incoming);
                worklist.push_back(position);
            }
            Some(existing) => {
                let merged = self.join_frames(existing, &incoming)?;
                if &merged != existing {
                    frames[position] = Some(merged);
                    worklist.push_back(position);
                }
            }
        }
        Ok(())
    }

    fn join_frames(&self, a: &AbstractFrame, b: &AbstractFrame) -> Result<AbstractFrame> {
        if a.stack.len() != b.stack.len() {
            return Err(anyhow!(
                "operand stacks of height {} and {} meet",
                a.stack.len(),
                b.stack.len()
            ));
        }
        if a.locals.len() != b.locals.len() {
            return Err(anyhow!("local tables of different size meet"));
        }

        let mut locals = Vec::with_capacity(a.locals.len());
        for (left, right) in a.locals.iter().zip(b.locals.iter()) {
            locals.push(self.join(left, right, false)?);
        }

        let mut stack = Vec::with_capacity(a.stack.len());
        for (left, right) in a.stack.iter().zip(b.stack.iter()) {
            stack.push(self.join(left, right, true)?);
        }

        Ok(AbstractFrame { locals, stack })
    }

    /// The join of two slot types. On the stack a size-class conflict is a
    /// verification failure; in a local it just makes the slot unusable.
    fn join(&self, a: &AbstractType, b: &AbstractType, on_stack: bool) -> Result<AbstractType> {
        use AbstractType::*;

        if a == b {
            return Ok(a.clone());
        }

        let joined = match (a, b) {
            (Null, other) | (other, Null) if other.is_reference_like() => other.clone(),
            (Reference(left), Reference(right)) => Reference(self.common_supertype(left, right)),
            (Array(left), Array(right)) => self.join_arrays(left, right),
            (Array(_), Reference(_)) | (Reference(_), Array(_)) => {
                Reference(OBJECT_CLASS.to_string())
            }
            _ => Top,
        };

        if on_stack && joined == Top {
            return Err(anyhow!("{:?} and {:?} meet on the stack", a, b));
        }

        Ok(joined)
    }

    fn join_arrays(&self, left: &str, right: &str) -> AbstractType {
        let left_ref = left.starts_with('L') || left.starts_with('[');
        let right_ref = right.starts_with('L') || right.starts_with('[');

        if left_ref && right_ref {
            let l = AbstractType::of_descriptor(left);
            let r = AbstractType::of_descriptor(right);
            if let (Ok(l), Ok(r)) = (l, r) {
                if let Ok(joined) = self.join(&l, &r, false) {
                    if let Some(name) = joined.internal_name() {
                        let element = if name.starts_with('[') {
                            name
                        } else {
                            format!("L{};", name)
                        };
                        return AbstractType::Array(element);
                    }
                }
            }
            return AbstractType::Array(format!("L{};", OBJECT_CLASS));
        }

        // Arrays of distinct primitives only share Object
        AbstractType::Reference(OBJECT_CLASS.to_string())
    }

    /// Nearest common superclass, walked through the summary cache.
    /// Interfaces and unresolvable classes fall back to Object.
    fn common_supertype(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }

        let mut ancestors: HashSet<String> = HashSet::new();
        let mut cursor = Some(a.to_string());
        while let Some(name) = cursor {
            ancestors.insert(name.clone());
            cursor = self
                .cache
                .summary(&name)
                .and_then(|s| s.super_name.clone());
        }

        let mut cursor = Some(b.to_string());
        while let Some(name) = cursor {
            if ancestors.contains(&name) {
                return name;
            }
            cursor = self
                .cache
                .summary(&name)
                .and_then(|s| s.super_name.clone());
        }

        OBJECT_CLASS.to_string()
    }

    fn step(&self, insn: &Insn, frame: &mut AbstractFrame) -> Result<Continuation> {
        match insn {
            Insn::Label(_) | Insn::Line(_) => Ok(Continuation::Next),
            Insn::Op(opcode) => self.step_op(*opcode, frame),

            Insn::Load { kind, index } => {
                let value = frame
                    .locals
                    .get(*index as usize)
                    .cloned()
                    .ok_or(anyhow!("load from local {} out of range", index))?;
                self.check_local_kind(*kind, &value)
                    .with_context(|| format!("load of local {}", index))?;
                frame.push(value);
                Ok(Continuation::Next)
            }
            Insn::Store { kind, index } => {
                let value = frame.pop()?;
                self.check_local_kind(*kind, &value)
                    .with_context(|| format!("store into local {}", index))?;

                let index = *index as usize;
                if index + value.width() > frame.locals.len() {
                    return Err(anyhow!("store into local {} out of range", index));
                }
                // A store clobbers a 64 bit value that started one slot lower
                if index > 0 && frame.locals[index - 1].width() == 2 {
                    frame.locals[index - 1] = AbstractType::Top;
                }
                if value.width() == 2 {
                    frame.locals[index + 1] = AbstractType::Top;
                }
                frame.locals[index] = value;
                Ok(Continuation::Next)
            }

            Insn::Push(value) => {
                frame.push(self.push_type(value)?);
                Ok(Continuation::Next)
            }

            Insn::Field {
                op: opcode,
                descriptor,
                ..
            } => {
                let field = AbstractType::of_descriptor(descriptor)?;
                match *opcode {
                    op::GETSTATIC => frame.push(field),
                    op::PUTSTATIC => {
                        frame.pop_width(field.width())?;
                    }
                    op::GETFIELD => {
                        frame.pop_reference()?;
                        frame.push(field);
                    }
                    op::PUTFIELD => {
                        frame.pop_width(field.width())?;
                        frame.pop_reference()?;
                    }
                    _ => return Err(anyhow!("{:#04x} is not a field opcode", opcode)),
                }
                Ok(Continuation::Next)
            }

            Insn::Invoke {
                kind,
                name,
                descriptor,
                ..
            } => {
                let descriptor = MethodType::parse(descriptor.clone())?;
                for parameter in descriptor.parameters.iter().rev() {
                    frame.pop_width(parameter.width())?;
                }

                if *kind != InvokeKind::Static {
                    let receiver = frame.pop_reference()?;
                    if *kind == InvokeKind::Special && name == "<init>" {
                        if let AbstractType::Uninitialised(class) = receiver {
                            self.initialise(frame, &class);
                        }
                    }
                }

                if !descriptor.return_type.is_void() {
                    frame.push(AbstractType::of_field_type(&descriptor.return_type)?);
                }
                Ok(Continuation::Next)
            }

            Insn::InvokeDynamic { descriptor, .. } => {
                let descriptor = MethodType::parse(descriptor.clone())?;
                for parameter in descriptor.parameters.iter().rev() {
                    frame.pop_width(parameter.width())?;
                }
                if !descriptor.return_type.is_void() {
                    frame.push(AbstractType::of_field_type(&descriptor.return_type)?);
                }
                Ok(Continuation::Next)
            }

            Insn::TypeOp {
                op: opcode,
                class_name,
            } => {
                match *opcode {
                    op::NEW => frame.push(AbstractType::Uninitialised(class_name.clone())),
                    op::CHECKCAST => {
                        frame.pop_reference()?;
                        frame.push(AbstractType::of_internal_name(class_name));
                    }
                    op::INSTANCEOF => {
                        frame.pop_reference()?;
                        frame.push(AbstractType::Int);
                    }
                    op::ANEWARRAY => {
                        frame.pop_int()?;
                        let element = if class_name.starts_with('[') {
                            class_name.clone()
                        } else {
                            format!("L{};", class_name)
                        };
                        frame.push(AbstractType::Array(element));
                    }
                    _ => return Err(anyhow!("{:#04x} is not a type opcode", opcode)),
                }
                Ok(Continuation::Next)
            }

            Insn::NewPrimitiveArray { atype } => {
                frame.pop_int()?;
                let element = match atype {
                    4 => "Z",
                    5 => "C",
                    6 => "F",
                    7 => "D",
                    8 => "B",
                    9 => "S",
                    10 => "I",
                    11 => "J",
                    _ => return Err(anyhow!("unknown primitive array type {}", atype)),
                };
                frame.push(AbstractType::Array(element.to_string()));
                Ok(Continuation::Next)
            }

            Insn::MultiNewArray { class_name, dims } => {
                for _ in 0..*dims {
                    frame.pop_int()?;
                }
                frame.push(AbstractType::of_internal_name(class_name));
                Ok(Continuation::Next)
            }

            Insn::Jump { op: opcode, target } => {
                match *opcode {
                    op::GOTO => return Ok(Continuation::Jump(*target)),
                    op::IFNULL | op::IFNONNULL => {
                        frame.pop_reference()?;
                    }
                    op::IF_ACMPEQ | op::IF_ACMPNE => {
                        frame.pop_reference()?;
                        frame.pop_reference()?;
                    }
                    op::IF_ICMPEQ..=op::IF_ICMPLE => {
                        frame.pop_int()?;
                        frame.pop_int()?;
                    }
                    op::IFEQ..=op::IFLE => {
                        frame.pop_int()?;
                    }
                    other => return Err(anyhow!("{:#04x} is not a jump opcode", other)),
                }
                Ok(Continuation::Branch(*target))
            }

            Insn::TableSwitch {
                default, targets, ..
            } => {
                frame.pop_int()?;
                let mut labels = targets.clone();
                labels.push(*default);
                Ok(Continuation::Switch(labels))
            }
            Insn::LookupSwitch { default, pairs } => {
                frame.pop_int()?;
                let mut labels: Vec<LabelId> = pairs.iter().map(|(_, t)| *t).collect();
                labels.push(*default);
                Ok(Continuation::Switch(labels))
            }

            Insn::Iinc { index, .. } => {
                match frame.locals.get(*index as usize) {
                    Some(AbstractType::Int) => Ok(Continuation::Next),
                    other => Err(anyhow!("iinc on local {} holding {:?}", index, other)),
                }
            }
        }
    }

    fn step_op(&self, opcode: u8, frame: &mut AbstractFrame) -> Result<Continuation> {
        match opcode {
            op::NOP => {}

            // Array loads
            op::IALOAD | op::BALOAD | op::CALOAD | op::SALOAD => {
                frame.pop_int()?;
                frame.pop_reference()?;
                frame.push(AbstractType::Int);
            }
            op::LALOAD => {
                frame.pop_int()?;
                frame.pop_reference()?;
                frame.push(AbstractType::Long);
            }
            op::FALOAD => {
                frame.pop_int()?;
                frame.pop_reference()?;
                frame.push(AbstractType::Float);
            }
            op::DALOAD => {
                frame.pop_int()?;
                frame.pop_reference()?;
                frame.push(AbstractType::Double);
            }
            op::AALOAD => {
                frame.pop_int()?;
                let array = frame.pop_reference()?;
                let element = match array {
                    AbstractType::Array(element) => AbstractType::of_descriptor(&element)?,
                    AbstractType::Null => AbstractType::Null,
                    _ => AbstractType::Reference(OBJECT_CLASS.to_string()),
                };
                frame.push(element);
            }

            // Array stores
            op::IASTORE | op::BASTORE | op::CASTORE | op::SASTORE => {
                frame.pop_int()?;
                frame.pop_int()?;
                frame.pop_reference()?;
            }
            op::LASTORE => {
                frame.pop_long()?;
                frame.pop_int()?;
                frame.pop_reference()?;
            }
            op::FASTORE => {
                frame.pop_float()?;
                frame.pop_int()?;
                frame.pop_reference()?;
            }
            op::DASTORE => {
                frame.pop_double()?;
                frame.pop_int()?;
                frame.pop_reference()?;
            }
            op::AASTORE => {
                frame.pop_reference()?;
                frame.pop_int()?;
                frame.pop_reference()?;
            }

            // Stack shuffles, defined over word groups
            op::POP => {
                frame.pop_width(1)?;
            }
            op::POP2 => {
                frame.take_words(2)?;
            }
            op::DUP => self.dup(frame, 1, 0)?,
            op::DUP_X1 => self.dup(frame, 1, 1)?,
            op::DUP_X2 => self.dup(frame, 1, 2)?,
            op::DUP2 => self.dup(frame, 2, 0)?,
            op::DUP2_X1 => self.dup(frame, 2, 1)?,
            op::DUP2_X2 => self.dup(frame, 2, 2)?,
            op::SWAP => {
                let a = frame.pop_width(1)?;
                let b = frame.pop_width(1)?;
                frame.push(a);
                frame.push(b);
            }

            // Arithmetic: four opcodes per operation, typed I/J/F/D
            op::IADD..=0x73 => {
                let ty = Self::arithmetic_type(opcode - op::IADD);
                frame.pop_width(ty.width())?;
                frame.pop_width(ty.width())?;
                frame.push(ty);
            }
            op::INEG..=op::DNEG => {
                let ty = Self::arithmetic_type(opcode - op::INEG);
                frame.pop_width(ty.width())?;
                frame.push(ty);
            }
            op::ISHL..=op::LUSHR => {
                frame.pop_int()?;
                let ty = Self::shift_type(opcode);
                frame.pop_width(ty.width())?;
                frame.push(ty);
            }
            op::IAND..=0x83 => {
                let ty = Self::logic_type(opcode);
                frame.pop_width(ty.width())?;
                frame.pop_width(ty.width())?;
                frame.push(ty);
            }

            // Conversions
            op::I2L..=op::I2S => {
                let (from, to) = Self::conversion(opcode);
                frame.pop_width(from.width())?;
                frame.push(to);
            }

            // Comparisons
            op::LCMP => {
                frame.pop_long()?;
                frame.pop_long()?;
                frame.push(AbstractType::Int);
            }
            op::FCMPL | op::FCMPG => {
                frame.pop_float()?;
                frame.pop_float()?;
                frame.push(AbstractType::Int);
            }
            op::DCMPL | op::DCMPG => {
                frame.pop_double()?;
                frame.pop_double()?;
                frame.push(AbstractType::Int);
            }

            // Returns end the flow
            op::IRETURN => {
                frame.pop_int()?;
                return Ok(Continuation::End);
            }
            op::LRETURN => {
                frame.pop_long()?;
                return Ok(Continuation::End);
            }
            op::FRETURN => {
                frame.pop_float()?;
                return Ok(Continuation::End);
            }
            op::DRETURN => {
                frame.pop_double()?;
                return Ok(Continuation::End);
            }
            op::ARETURN => {
                frame.pop_reference()?;
                return Ok(Continuation::End);
            }
            op::RETURN => return Ok(Continuation::End),

            op::ARRAYLENGTH => {
                frame.pop_reference()?;
                frame.push(AbstractType::Int);
            }
            op::ATHROW => {
                frame.pop_reference()?;
                return Ok(Continuation::End);
            }
            op::MONITORENTER | op::MONITOREXIT => {
                frame.pop_reference()?;
            }

            other => return Err(anyhow!("no transfer for opcode {:#04x}", other)),
        }

        Ok(Continuation::Next)
    }

    fn dup(&self, frame: &mut AbstractFrame, duplicated: usize, skipped: usize) -> Result<()> {
        let group = frame.take_words(duplicated)?;
        let below = frame.take_words(skipped)?;

        for value in group.iter() {
            frame.push(value.clone());
        }
        for value in below {
            frame.push(value);
        }
        for value in group {
            frame.push(value);
        }
        Ok(())
    }

    fn arithmetic_type(distance: u8) -> AbstractType {
        match distance % 4 {
            0 => AbstractType::Int,
            1 => AbstractType::Long,
            2 => AbstractType::Float,
            _ => AbstractType::Double,
        }
    }

    fn shift_type(opcode: u8) -> AbstractType {
        if (opcode - op::ISHL) % 2 == 0 {
            AbstractType::Int
        } else {
            AbstractType::Long
        }
    }

    fn logic_type(opcode: u8) -> AbstractType {
        if (opcode - op::IAND) % 2 == 0 {
            AbstractType::Int
        } else {
            AbstractType::Long
        }
    }

    fn conversion(opcode: u8) -> (AbstractType, AbstractType) {
        use AbstractType::*;
        match opcode {
            op::I2L => (Int, Long),
            op::I2F => (Int, Float),
            op::I2D => (Int, Double),
            op::L2I => (Long, Int),
            op::L2F => (Long, Float),
            op::L2D => (Long, Double),
            op::F2I => (Float, Int),
            op::F2L => (Float, Long),
            op::F2D => (Float, Double),
            op::D2I => (Double, Int),
            op::D2L => (Double, Long),
            op::D2F => (Double, Float),
            // i2b, i2c, i2s
            _ => (Int, Int),
        }
    }

    fn check_local_kind(&self, kind: LocalKind, value: &AbstractType) -> Result<()> {
        let matches = match kind {
            LocalKind::Int => matches!(value, AbstractType::Int),
            LocalKind::Long => matches!(value, AbstractType::Long),
            LocalKind::Float => matches!(value, AbstractType::Float),
            LocalKind::Double => matches!(value, AbstractType::Double),
            LocalKind::Reference => value.is_reference_like() || value.is_uninitialised(),
        };
        if !matches {
            return Err(anyhow!("{:?} access on a {:?} value", kind, value));
        }
        Ok(())
    }

    fn push_type(&self, value: &PushValue) -> Result<AbstractType> {
        Ok(match value {
            PushValue::Null => AbstractType::Null,
            PushValue::Int(_) => AbstractType::Int,
            PushValue::Long(_) => AbstractType::Long,
            PushValue::Float(_) => AbstractType::Float,
            PushValue::Double(_) => AbstractType::Double,
            PushValue::String(_) => AbstractType::Reference("java/lang/String".to_string()),
            PushValue::Class(_) => AbstractType::Reference("java/lang/Class".to_string()),
            PushValue::Pool { index, .. } => match self.pool.entry_at(*index)? {
                ConstantEntry::MethodHandle(_) => {
                    AbstractType::Reference("java/lang/invoke/MethodHandle".to_string())
                }
                ConstantEntry::MethodType(_) => {
                    AbstractType::Reference("java/lang/invoke/MethodType".to_string())
                }
                ConstantEntry::Dynamic(data) => {
                    let descriptor = data
                        .name_and_type
                        .try_resolve()?
                        .descriptor
                        .try_resolve()?
                        .try_string()?;
                    AbstractType::of_descriptor(&descriptor)?
                }
                e => return Err(anyhow!("{:?} is not loadable", e)),
            },
        })
    }

    /// An <init> call turns every copy of the uninitialised value into a
    /// live reference.
    fn initialise(&self, frame: &mut AbstractFrame, class: &str) {
        let uninit = AbstractType::Uninitialised(class.to_string());
        let live = AbstractType::Reference(class.to_string());

        for slot in frame.locals.iter_mut() {
            if *slot == uninit {
                *slot = live.clone();
            }
        }
        for slot in frame.stack.iter_mut() {
            if *slot == uninit {
                *slot = live.clone();
            }
        }
    }
}
