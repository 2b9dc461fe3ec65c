//! Conversion between the raw Code attribute and the editable instruction
//! list. Decoding resolves branch offsets into labels; encoding lays the list
//! back out, iterating until label offsets stabilise.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{anyhow, Result};
use bytes::{BufMut, BytesMut};
use support::descriptor::MethodType;

use crate::{
    classfile::Resolvable,
    attributes::{
        Attributes, CodeAttribute, ExceptionEntry, KnownAttribute, LineNumberEntry,
        LineNumberTableAttribute,
    },
    constants,
    insn::{Insn, InsnId, InsnList, InvokeKind, LabelId, LocalKind, PushValue},
    opcodes as op,
    pool::{ConstantEntry, ConstantPool},
};

/// One protected region, in label form. A `catch_type` of None is the
/// catch-all entry used by finally blocks and by the transformer's own tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    pub catch_type: Option<String>,
}

/// A decoded method body: the instruction list plus everything else the Code
/// attribute carries. Labels are stable identities; offsets exist only at the
/// byte boundary.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: InsnList,
    pub regions: Vec<Region>,
    pub extra_attributes: Attributes,
}

pub fn decode_body(attr: &CodeAttribute, pool: &ConstantPool) -> Result<MethodBody> {
    let code = &attr.code;
    let mut decoded: Vec<(u32, Insn)> = Vec::new();
    let mut boundaries: BTreeSet<u32> = BTreeSet::new();

    let mut pc: usize = 0;
    while pc < code.len() {
        boundaries.insert(pc as u32);
        let (insn, next) = decode_insn(code, pc, pool)?;
        decoded.push((pc as u32, insn));
        pc = next;
    }
    // The end of the code array is a valid (exclusive) region boundary
    boundaries.insert(code.len() as u32);

    // Collect every pc that needs a label: jump targets, switch targets and
    // protected region boundaries. Temporary labels carry the raw target pc.
    let mut target_pcs: BTreeSet<u32> = BTreeSet::new();
    for (_, insn) in decoded.iter() {
        match insn {
            Insn::Jump { target, .. } => {
                target_pcs.insert(target.raw());
            }
            Insn::TableSwitch {
                default, targets, ..
            } => {
                target_pcs.insert(default.raw());
                for t in targets.iter() {
                    target_pcs.insert(t.raw());
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                target_pcs.insert(default.raw());
                for (_, t) in pairs.iter() {
                    target_pcs.insert(t.raw());
                }
            }
            _ => {}
        }
    }
    for entry in attr.exception_table.iter() {
        target_pcs.insert(entry.start_pc as u32);
        target_pcs.insert(entry.end_pc as u32);
        target_pcs.insert(entry.handler_pc as u32);
    }

    for target in target_pcs.iter() {
        if !boundaries.contains(target) {
            return Err(anyhow!("jump target {} is not an instruction boundary", target));
        }
    }

    let mut list = InsnList::new();
    let labels: BTreeMap<u32, LabelId> = target_pcs
        .iter()
        .map(|pc| (*pc, list.new_label()))
        .collect();

    let line_table = attr
        .attributes
        .known_attribute::<LineNumberTableAttribute>(pool)
        .unwrap_or_default();
    let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
    for entry in line_table.entries.iter() {
        lines
            .entry(entry.start_pc as u32)
            .or_default()
            .push(entry.line);
    }

    for (pc, insn) in decoded {
        if let Some(label) = labels.get(&pc) {
            list.push_back(Insn::Label(*label));
        }
        if let Some(entry_lines) = lines.get(&pc) {
            for line in entry_lines {
                list.push_back(Insn::Line(*line));
            }
        }
        list.push_back(relabel(insn, &labels));
    }
    // Exclusive region ends can point one past the last instruction
    if let Some(label) = labels.get(&(code.len() as u32)) {
        list.push_back(Insn::Label(*label));
    }

    let mut regions = Vec::with_capacity(attr.exception_table.len());
    for entry in attr.exception_table.iter() {
        let catch_type = match entry.catch_type {
            0 => None,
            index => Some(pool.class_name_at(index)?),
        };
        regions.push(Region {
            start: labels[&(entry.start_pc as u32)],
            end: labels[&(entry.end_pc as u32)],
            handler: labels[&(entry.handler_pc as u32)],
            catch_type,
        });
    }

    let mut extra_attributes = attr.attributes.clone();
    extra_attributes.remove(constants::LINE_NUMBER_TABLE);

    Ok(MethodBody {
        max_stack: attr.max_stack,
        max_locals: attr.max_locals,
        code: list,
        regions,
        extra_attributes,
    })
}

fn relabel(insn: Insn, labels: &BTreeMap<u32, LabelId>) -> Insn {
    let map = |l: LabelId| labels[&l.raw()];
    match insn {
        Insn::Jump { op, target } => Insn::Jump {
            op,
            target: map(target),
        },
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => Insn::TableSwitch {
            low,
            high,
            default: map(default),
            targets: targets.into_iter().map(map).collect(),
        },
        Insn::LookupSwitch { default, pairs } => Insn::LookupSwitch {
            default: map(default),
            pairs: pairs.into_iter().map(|(k, t)| (k, map(t))).collect(),
        },
        other => other,
    }
}

fn u8_at(code: &[u8], pc: usize) -> Result<u8> {
    code.get(pc).copied().ok_or(anyhow!("code out of bounds"))
}

fn u16_at(code: &[u8], pc: usize) -> Result<u16> {
    Ok(((u8_at(code, pc)? as u16) << 8) | u8_at(code, pc + 1)? as u16)
}

fn i16_at(code: &[u8], pc: usize) -> Result<i16> {
    Ok(u16_at(code, pc)? as i16)
}

fn i32_at(code: &[u8], pc: usize) -> Result<i32> {
    Ok(((u16_at(code, pc)? as u32) << 16 | u16_at(code, pc + 2)? as u32) as i32)
}

/// Temporary label carrying a raw target pc; remapped before list building.
fn pc_label(pc: i64) -> Result<LabelId> {
    if !(0..=u32::MAX as i64).contains(&pc) {
        return Err(anyhow!("branch target {} out of range", pc));
    }
    Ok(LabelId::from_raw(pc as u32))
}

fn decode_insn(code: &[u8], pc: usize, pool: &ConstantPool) -> Result<(Insn, usize)> {
    let opcode = u8_at(code, pc)?;

    let local_kind_of = |base_distance: u8| match base_distance {
        0 => LocalKind::Int,
        1 => LocalKind::Long,
        2 => LocalKind::Float,
        3 => LocalKind::Double,
        _ => LocalKind::Reference,
    };

    Ok(match opcode {
        // Narrow constant pushes keep their literal form
        op::ACONST_NULL => (Insn::Push(PushValue::Null), pc + 1),
        op::ICONST_M1..=0x08 => (
            Insn::Push(PushValue::Int(opcode as i32 - op::ICONST_0 as i32)),
            pc + 1,
        ),
        op::LCONST_0 | 0x0a => (
            Insn::Push(PushValue::Long((opcode - op::LCONST_0) as i64)),
            pc + 1,
        ),
        op::FCONST_0..=0x0d => (
            Insn::Push(PushValue::Float((opcode - op::FCONST_0) as f32)),
            pc + 1,
        ),
        op::DCONST_0 | 0x0f => (
            Insn::Push(PushValue::Double((opcode - op::DCONST_0) as f64)),
            pc + 1,
        ),
        op::BIPUSH => (
            Insn::Push(PushValue::Int(u8_at(code, pc + 1)? as i8 as i32)),
            pc + 2,
        ),
        op::SIPUSH => (Insn::Push(PushValue::Int(i16_at(code, pc + 1)? as i32)), pc + 3),
        op::LDC => (decode_ldc(u8_at(code, pc + 1)? as u16, false, pool)?, pc + 2),
        op::LDC_W => (decode_ldc(u16_at(code, pc + 1)?, false, pool)?, pc + 3),
        op::LDC2_W => (decode_ldc(u16_at(code, pc + 1)?, true, pool)?, pc + 3),

        op::ILOAD..=op::ALOAD => (
            Insn::Load {
                kind: local_kind_of(opcode - op::ILOAD),
                index: u8_at(code, pc + 1)? as u16,
            },
            pc + 2,
        ),
        op::ILOAD_0..=0x2d => {
            let distance = opcode - op::ILOAD_0;
            (
                Insn::Load {
                    kind: local_kind_of(distance / 4),
                    index: (distance % 4) as u16,
                },
                pc + 1,
            )
        }
        op::ISTORE..=op::ASTORE => (
            Insn::Store {
                kind: local_kind_of(opcode - op::ISTORE),
                index: u8_at(code, pc + 1)? as u16,
            },
            pc + 2,
        ),
        op::ISTORE_0..=0x4e => {
            let distance = opcode - op::ISTORE_0;
            (
                Insn::Store {
                    kind: local_kind_of(distance / 4),
                    index: (distance % 4) as u16,
                },
                pc + 1,
            )
        }

        op::IINC => (
            Insn::Iinc {
                index: u8_at(code, pc + 1)? as u16,
                delta: u8_at(code, pc + 2)? as i8 as i16,
            },
            pc + 3,
        ),

        op::IFEQ..=op::GOTO | op::IFNULL | op::IFNONNULL => (
            Insn::Jump {
                op: opcode,
                target: pc_label(pc as i64 + i16_at(code, pc + 1)? as i64)?,
            },
            pc + 3,
        ),
        op::GOTO_W => (
            Insn::Jump {
                // Width is an encoding concern; the list holds one goto form
                op: op::GOTO,
                target: pc_label(pc as i64 + i32_at(code, pc + 1)? as i64)?,
            },
            pc + 5,
        ),
        op::JSR | op::RET | op::JSR_W => {
            return Err(anyhow!("jsr/ret subroutines are not supported"))
        }

        op::TABLESWITCH => {
            let mut cursor = pc + 1;
            cursor += (4 - (cursor % 4)) % 4;
            let default = pc_label(pc as i64 + i32_at(code, cursor)? as i64)?;
            let low = i32_at(code, cursor + 4)?;
            let high = i32_at(code, cursor + 8)?;
            if high < low {
                return Err(anyhow!("tableswitch bounds {}..{} are inverted", low, high));
            }
            cursor += 12;

            let count = (high as i64 - low as i64 + 1) as usize;
            if count > code.len() {
                return Err(anyhow!("tableswitch with {} targets overruns the code", count));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(pc_label(pc as i64 + i32_at(code, cursor)? as i64)?);
                cursor += 4;
            }

            (
                Insn::TableSwitch {
                    low,
                    high,
                    default,
                    targets,
                },
                cursor,
            )
        }
        op::LOOKUPSWITCH => {
            let mut cursor = pc + 1;
            cursor += (4 - (cursor % 4)) % 4;
            let default = pc_label(pc as i64 + i32_at(code, cursor)? as i64)?;
            let count = i32_at(code, cursor + 4)?;
            if count < 0 || count as usize > code.len() {
                return Err(anyhow!("lookupswitch pair count {} out of bounds", count));
            }
            cursor += 8;

            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = i32_at(code, cursor)?;
                let target = pc_label(pc as i64 + i32_at(code, cursor + 4)? as i64)?;
                pairs.push((key, target));
                cursor += 8;
            }

            (Insn::LookupSwitch { default, pairs }, cursor)
        }

        op::GETSTATIC..=op::PUTFIELD => {
            let index = u16_at(code, pc + 1)?;
            let (owner, name, descriptor) = member_at(pool, index)?;
            (
                Insn::Field {
                    op: opcode,
                    owner,
                    name,
                    descriptor,
                },
                pc + 3,
            )
        }
        op::INVOKEVIRTUAL | op::INVOKESPECIAL | op::INVOKESTATIC => {
            let index = u16_at(code, pc + 1)?;
            let (owner, name, descriptor) = member_at(pool, index)?;
            let owner_interface =
                matches!(pool.entry_at(index)?, ConstantEntry::InterfaceMethod(_));
            (
                Insn::Invoke {
                    kind: match opcode {
                        op::INVOKEVIRTUAL => InvokeKind::Virtual,
                        op::INVOKESPECIAL => InvokeKind::Special,
                        _ => InvokeKind::Static,
                    },
                    owner_interface,
                    owner,
                    name,
                    descriptor,
                },
                pc + 3,
            )
        }
        op::INVOKEINTERFACE => {
            let index = u16_at(code, pc + 1)?;
            let (owner, name, descriptor) = member_at(pool, index)?;
            (
                Insn::Invoke {
                    kind: InvokeKind::Interface,
                    owner_interface: true,
                    owner,
                    name,
                    descriptor,
                },
                pc + 5,
            )
        }
        op::INVOKEDYNAMIC => {
            let index = u16_at(code, pc + 1)?;
            let descriptor = match pool.entry_at(index)? {
                ConstantEntry::InvokeDynamic(data) => data
                    .name_and_type
                    .try_resolve()?
                    .descriptor
                    .try_resolve()?
                    .try_string()?,
                e => return Err(anyhow!("expected InvokeDynamic, got {:?}", e)),
            };
            (Insn::InvokeDynamic { index, descriptor }, pc + 5)
        }

        op::NEW | op::ANEWARRAY | op::CHECKCAST | op::INSTANCEOF => (
            Insn::TypeOp {
                op: opcode,
                class_name: pool.class_name_at(u16_at(code, pc + 1)?)?,
            },
            pc + 3,
        ),
        op::NEWARRAY => (
            Insn::NewPrimitiveArray {
                atype: u8_at(code, pc + 1)?,
            },
            pc + 2,
        ),
        op::MULTIANEWARRAY => (
            Insn::MultiNewArray {
                class_name: pool.class_name_at(u16_at(code, pc + 1)?)?,
                dims: u8_at(code, pc + 3)?,
            },
            pc + 4,
        ),

        op::WIDE => {
            let wide_op = u8_at(code, pc + 1)?;
            let index = u16_at(code, pc + 2)?;
            match wide_op {
                op::ILOAD..=op::ALOAD => (
                    Insn::Load {
                        kind: local_kind_of(wide_op - op::ILOAD),
                        index,
                    },
                    pc + 4,
                ),
                op::ISTORE..=op::ASTORE => (
                    Insn::Store {
                        kind: local_kind_of(wide_op - op::ISTORE),
                        index,
                    },
                    pc + 4,
                ),
                op::IINC => (
                    Insn::Iinc {
                        index,
                        delta: i16_at(code, pc + 4)?,
                    },
                    pc + 6,
                ),
                op::RET => return Err(anyhow!("jsr/ret subroutines are not supported")),
                _ => return Err(anyhow!("{:#04x} cannot be widened", wide_op)),
            }
        }

        // Everything else is operand free
        op::NOP
        | op::IALOAD..=op::SALOAD
        | op::IASTORE..=op::SASTORE
        | op::POP..=op::SWAP
        | op::IADD..=0x83
        | op::I2L..=op::DCMPG
        | op::IRETURN..=op::RETURN
        | op::ARRAYLENGTH
        | op::ATHROW
        | op::MONITORENTER
        | op::MONITOREXIT => (Insn::Op(opcode), pc + 1),

        _ => return Err(anyhow!("unknown opcode {:#04x} at {}", opcode, pc)),
    })
}

fn decode_ldc(index: u16, wide: bool, pool: &ConstantPool) -> Result<Insn> {
    let value = match pool.entry_at(index)? {
        ConstantEntry::Integer(data) if !wide => PushValue::Int(data.bytes as i32),
        ConstantEntry::Float(data) if !wide => PushValue::Float(data.bytes),
        ConstantEntry::Long(data) if wide => PushValue::Long(data.bytes as i64),
        ConstantEntry::Double(data) if wide => PushValue::Double(data.bytes),
        ConstantEntry::String(data) if !wide => PushValue::String(data.try_string()?),
        ConstantEntry::Class(data) if !wide => {
            PushValue::Class(data.name.try_resolve()?.try_string()?)
        }
        ConstantEntry::MethodHandle(_) | ConstantEntry::MethodType(_) | ConstantEntry::Dynamic(_) => {
            PushValue::Pool { index, wide }
        }
        e => return Err(anyhow!("{:?} is not loadable (wide: {})", e, wide)),
    };
    Ok(Insn::Push(value))
}

fn member_at(pool: &ConstantPool, index: u16) -> Result<(String, String, String)> {
    let (class, name_and_type) = match pool.entry_at(index)? {
        ConstantEntry::Field(data) => (data.class, data.name_and_type),
        ConstantEntry::Method(data) => (data.class, data.name_and_type),
        ConstantEntry::InterfaceMethod(data) => (data.class, data.name_and_type),
        e => return Err(anyhow!("expected a member reference, got {:?}", e)),
    };

    let owner = class.try_resolve()?.name.try_resolve()?.try_string()?;
    let nat = name_and_type.try_resolve()?;
    let name = nat.name.try_resolve()?.try_string()?;
    let descriptor = nat.descriptor.try_resolve()?.try_string()?;

    Ok((owner, name, descriptor))
}

// --- encoding ---

struct Layout {
    label_pcs: HashMap<LabelId, u32>,
    wide_gotos: std::collections::HashSet<InsnId>,
    code_len: u32,
}

impl MethodBody {
    pub fn encode(&self, pool: &mut ConstantPool) -> Result<CodeAttribute> {
        let layout = self.layout(pool)?;

        let mut out = BytesMut::with_capacity(layout.code_len as usize);
        let mut line_entries: Vec<LineNumberEntry> = Vec::new();

        for (id, insn) in self.code.iter() {
            let pc = out.len() as u32;
            match insn {
                Insn::Label(_) => {}
                Insn::Line(line) => line_entries.push(LineNumberEntry {
                    start_pc: pc as u16,
                    line: *line,
                }),
                _ => emit_insn(insn, id, pc, &layout, pool, &mut out)?,
            }
        }

        debug_assert_eq!(out.len() as u32, layout.code_len);
        if out.len() > u16::MAX as usize {
            return Err(anyhow!("method over 65535 bytes after rewriting"));
        }

        let mut exception_table = Vec::with_capacity(self.regions.len());
        for region in self.regions.iter() {
            let resolve = |label: LabelId| {
                layout
                    .label_pcs
                    .get(&label)
                    .copied()
                    .ok_or(anyhow!("unplaced label {}", label))
            };
            exception_table.push(ExceptionEntry {
                start_pc: resolve(region.start)? as u16,
                end_pc: resolve(region.end)? as u16,
                handler_pc: resolve(region.handler)? as u16,
                catch_type: match &region.catch_type {
                    Some(name) => pool.class(name),
                    None => 0,
                },
            });
        }

        let mut attributes = Attributes::empty();
        if !line_entries.is_empty() {
            let table = LineNumberTableAttribute {
                entries: line_entries,
            };
            let data = table.encode(pool)?;
            attributes.put(pool, constants::LINE_NUMBER_TABLE, data);
        }
        for attr in self.extra_attributes.values.iter() {
            attributes.values.push(attr.clone());
        }

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: out.to_vec(),
            exception_table,
            attributes,
        })
    }

    /// Iterate pc assignment until stable. Switch padding depends on the
    /// switch's own pc and goto widening is sticky, so the loop terminates.
    fn layout(&self, pool: &mut ConstantPool) -> Result<Layout> {
        let mut layout = Layout {
            label_pcs: HashMap::new(),
            wide_gotos: std::collections::HashSet::new(),
            code_len: 0,
        };

        loop {
            let mut pcs: HashMap<LabelId, u32> = HashMap::new();
            let mut pc: u32 = 0;

            for (id, insn) in self.code.iter() {
                if let Insn::Label(label) = insn {
                    pcs.insert(*label, pc);
                    continue;
                }
                pc += insn_size(insn, id, pc, &layout, pool)?;
            }

            let stable = pcs == layout.label_pcs;
            layout.label_pcs = pcs;
            layout.code_len = pc;
            if !stable {
                continue;
            }

            // Offsets are settled; widen any unconditional jump that cannot
            // reach its target in 16 bits and lay out again.
            let mut widened = false;
            let mut cursor: u32 = 0;
            for (id, insn) in self.code.iter() {
                if let Insn::Label(_) = insn {
                    continue;
                }
                if let Insn::Jump { op: jump_op, target } = insn {
                    let target_pc = *layout
                        .label_pcs
                        .get(target)
                        .ok_or(anyhow!("unplaced label {}", target))?;
                    let offset = target_pc as i64 - cursor as i64;
                    if !(i16::MIN as i64..=i16::MAX as i64).contains(&offset) {
                        if *jump_op == op::GOTO {
                            if layout.wide_gotos.insert(id) {
                                widened = true;
                            }
                        } else {
                            return Err(anyhow!(
                                "conditional branch at {} overflows a 16 bit offset",
                                cursor
                            ));
                        }
                    }
                }
                cursor += insn_size(insn, id, cursor, &layout, pool)?;
            }

            if !widened {
                return Ok(layout);
            }
        }
    }
}

/// Short-form float constants must match bit for bit; -0.0 compares equal
/// to 0.0 but fconst_0 would lose its sign.
fn is_fconst(value: f32) -> bool {
    [0.0f32, 1.0, 2.0].iter().any(|c| c.to_bits() == value.to_bits())
}

fn is_dconst(value: f64) -> bool {
    [0.0f64, 1.0].iter().any(|c| c.to_bits() == value.to_bits())
}

fn ldc_index(value: &PushValue, pool: &mut ConstantPool) -> Result<(u16, bool)> {
    Ok(match value {
        PushValue::Int(v) => (pool.integer(*v), false),
        PushValue::Float(v) => (pool.float(*v), false),
        PushValue::Long(v) => (pool.long(*v), true),
        PushValue::Double(v) => (pool.double(*v), true),
        PushValue::String(v) => (pool.string(v), false),
        PushValue::Class(v) => (pool.class(v), false),
        PushValue::Pool { index, wide } => (*index, *wide),
        PushValue::Null => return Err(anyhow!("null is not a pool constant")),
    })
}

fn insn_size(
    insn: &Insn,
    id: InsnId,
    pc: u32,
    layout: &Layout,
    pool: &mut ConstantPool,
) -> Result<u32> {
    Ok(match insn {
        Insn::Label(_) | Insn::Line(_) => 0,
        Insn::Op(_) => 1,
        Insn::Load { index, .. } | Insn::Store { index, .. } => match index {
            0..=3 => 1,
            4..=255 => 2,
            _ => 4,
        },
        Insn::Push(value) => match value {
            PushValue::Null => 1,
            PushValue::Int(v) if (-1..=5).contains(v) => 1,
            PushValue::Int(v) if i8::try_from(*v).is_ok() => 2,
            PushValue::Int(v) if i16::try_from(*v).is_ok() => 3,
            PushValue::Long(v) if (0..=1).contains(v) => 1,
            PushValue::Float(v) if is_fconst(*v) => 1,
            PushValue::Double(v) if is_dconst(*v) => 1,
            _ => {
                let (index, wide) = ldc_index(value, pool)?;
                if wide || index > u8::MAX as u16 {
                    3
                } else {
                    2
                }
            }
        },
        Insn::Field { .. } => 3,
        Insn::Invoke { kind, .. } => match kind {
            InvokeKind::Interface => 5,
            _ => 3,
        },
        Insn::InvokeDynamic { .. } => 5,
        Insn::TypeOp { .. } => 3,
        Insn::NewPrimitiveArray { .. } => 2,
        Insn::MultiNewArray { .. } => 4,
        Insn::Jump { .. } => {
            if layout.wide_gotos.contains(&id) {
                5
            } else {
                3
            }
        }
        Insn::TableSwitch { targets, .. } => {
            let pad = (4 - ((pc + 1) % 4)) % 4;
            1 + pad + 12 + 4 * targets.len() as u32
        }
        Insn::LookupSwitch { pairs, .. } => {
            let pad = (4 - ((pc + 1) % 4)) % 4;
            1 + pad + 8 + 8 * pairs.len() as u32
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
    })
}

fn emit_insn(
    insn: &Insn,
    id: InsnId,
    pc: u32,
    layout: &Layout,
    pool: &mut ConstantPool,
    out: &mut BytesMut,
) -> Result<()> {
    let target_pc = |label: &LabelId| -> Result<i64> {
        layout
            .label_pcs
            .get(label)
            .map(|t| *t as i64 - pc as i64)
            .ok_or(anyhow!("unplaced label {}", label))
    };

    match insn {
        Insn::Label(_) | Insn::Line(_) => {}
        Insn::Op(opcode) => out.put_u8(*opcode),
        Insn::Load { kind, index } | Insn::Store { kind, index } => {
            let store = matches!(insn, Insn::Store { .. });
            let (base, short_base) = if store {
                (op::ISTORE, op::ISTORE_0)
            } else {
                (op::ILOAD, op::ILOAD_0)
            };
            let kind_offset = match kind {
                LocalKind::Int => 0,
                LocalKind::Long => 1,
                LocalKind::Float => 2,
                LocalKind::Double => 3,
                LocalKind::Reference => 4,
            };
            match index {
                0..=3 => out.put_u8(short_base + kind_offset * 4 + *index as u8),
                4..=255 => {
                    out.put_u8(base + kind_offset);
                    out.put_u8(*index as u8);
                }
                _ => {
                    out.put_u8(op::WIDE);
                    out.put_u8(base + kind_offset);
                    out.put_u16(*index);
                }
            }
        }
        Insn::Push(value) => match value {
            PushValue::Null => out.put_u8(op::ACONST_NULL),
            PushValue::Int(v) if (-1..=5).contains(v) => {
                out.put_u8((op::ICONST_0 as i32 + v) as u8)
            }
            PushValue::Int(v) if i8::try_from(*v).is_ok() => {
                out.put_u8(op::BIPUSH);
                out.put_u8(*v as i8 as u8);
            }
            PushValue::Int(v) if i16::try_from(*v).is_ok() => {
                out.put_u8(op::SIPUSH);
                out.put_i16(*v as i16);
            }
            PushValue::Long(v) if (0..=1).contains(v) => out.put_u8(op::LCONST_0 + *v as u8),
            PushValue::Float(v) if is_fconst(*v) => out.put_u8(op::FCONST_0 + *v as u8),
            PushValue::Double(v) if is_dconst(*v) => out.put_u8(op::DCONST_0 + *v as u8),
            _ => {
                let (index, wide) = ldc_index(value, pool)?;
                if wide {
                    out.put_u8(op::LDC2_W);
                    out.put_u16(index);
                } else if index > u8::MAX as u16 {
                    out.put_u8(op::LDC_W);
                    out.put_u16(index);
                } else {
                    out.put_u8(op::LDC);
                    out.put_u8(index as u8);
                }
            }
        },
        Insn::Field {
            op: opcode,
            owner,
            name,
            descriptor,
        } => {
            out.put_u8(*opcode);
            out.put_u16(pool.field_ref(owner, name, descriptor));
        }
        Insn::Invoke {
            kind,
            owner_interface,
            owner,
            name,
            descriptor,
        } => {
            let index = if *owner_interface {
                pool.interface_method_ref(owner, name, descriptor)
            } else {
                pool.method_ref(owner, name, descriptor)
            };
            match kind {
                InvokeKind::Virtual => {
                    out.put_u8(op::INVOKEVIRTUAL);
                    out.put_u16(index);
                }
                InvokeKind::Static => {
                    out.put_u8(op::INVOKESTATIC);
                    out.put_u16(index);
                }
                InvokeKind::Special => {
                    out.put_u8(op::INVOKESPECIAL);
                    out.put_u16(index);
                }
                InvokeKind::Interface => {
                    let descriptor = MethodType::parse(descriptor.clone())?;
                    out.put_u8(op::INVOKEINTERFACE);
                    out.put_u16(index);
                    out.put_u8((descriptor.parameter_slots() + 1) as u8);
                    out.put_u8(0);
                }
            }
        }
        Insn::InvokeDynamic { index, .. } => {
            out.put_u8(op::INVOKEDYNAMIC);
            out.put_u16(*index);
            out.put_u16(0);
        }
        Insn::TypeOp { op: opcode, class_name } => {
            out.put_u8(*opcode);
            out.put_u16(pool.class(class_name));
        }
        Insn::NewPrimitiveArray { atype } => {
            out.put_u8(op::NEWARRAY);
            out.put_u8(*atype);
        }
        Insn::MultiNewArray { class_name, dims } => {
            out.put_u8(op::MULTIANEWARRAY);
            out.put_u16(pool.class(class_name));
            out.put_u8(*dims);
        }
        Insn::Jump { op: jump_op, target } => {
            let offset = target_pc(target)?;
            if layout.wide_gotos.contains(&id) {
                out.put_u8(op::GOTO_W);
                out.put_i32(offset as i32);
            } else {
                out.put_u8(*jump_op);
                out.put_i16(offset as i16);
            }
        }
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            out.put_u8(op::TABLESWITCH);
            for _ in 0..(4 - ((pc + 1) % 4)) % 4 {
                out.put_u8(0);
            }
            out.put_i32(target_pc(default)? as i32);
            out.put_i32(*low);
            out.put_i32(*high);
            for target in targets.iter() {
                out.put_i32(target_pc(target)? as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.put_u8(op::LOOKUPSWITCH);
            for _ in 0..(4 - ((pc + 1) % 4)) % 4 {
                out.put_u8(0);
            }
            out.put_i32(target_pc(default)? as i32);
            out.put_i32(pairs.len() as i32);
            for (key, target) in pairs.iter() {
                out.put_i32(*key);
                out.put_i32(target_pc(target)? as i32);
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                out.put_u8(op::IINC);
                out.put_u8(*index as u8);
                out.put_u8(*delta as i8 as u8);
            } else {
                out.put_u8(op::WIDE);
                out.put_u8(op::IINC);
                out.put_u16(*index);
                out.put_i16(*delta);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes;

    fn empty_attr(code: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack: 4,
            max_locals: 4,
            code,
            exception_table: vec![],
            attributes: Attributes::empty(),
        }
    }

    #[test]
    fn it_round_trips_straight_line_code() -> Result<()> {
        let pool = ConstantPool::new();
        // iconst_2; iload_1; iadd; ireturn
        let attr = empty_attr(vec![0x05, 0x1b, 0x60, 0xac]);

        let body = decode_body(&attr, &pool)?;
        let insns: Vec<&Insn> = body.code.iter().map(|(_, i)| i).collect();
        assert_eq!(
            insns,
            vec![
                &Insn::Push(PushValue::Int(2)),
                &Insn::Load {
                    kind: LocalKind::Int,
                    index: 1
                },
                &Insn::Op(opcodes::IADD),
                &Insn::Op(opcodes::IRETURN),
            ]
        );

        let mut pool = ConstantPool::new();
        let encoded = body.encode(&mut pool)?;
        assert_eq!(encoded.code, vec![0x05, 0x1b, 0x60, 0xac]);

        Ok(())
    }

    #[test]
    fn it_recovers_labels_from_branches() -> Result<()> {
        let pool = ConstantPool::new();
        // iload_0; ifeq +5 (-> return); iconst_1; istore_0; return
        let attr = empty_attr(vec![0x1a, 0x99, 0x00, 0x05, 0x04, 0x3b, 0xb1]);

        let body = decode_body(&attr, &pool)?;
        let jump_target = body
            .code
            .iter()
            .find_map(|(_, i)| match i {
                Insn::Jump { target, .. } => Some(*target),
                _ => None,
            })
            .expect("a jump survives decoding");
        let target = body.code.label_position(jump_target).expect("target placed");

        // The label lands immediately before the final return
        let order = body.code.ids();
        assert_eq!(order[order.len() - 2], target);

        let mut pool = ConstantPool::new();
        let encoded = body.encode(&mut pool)?;
        assert_eq!(encoded.code, vec![0x1a, 0x99, 0x00, 0x05, 0x04, 0x3b, 0xb1]);

        Ok(())
    }

    #[test]
    fn it_aligns_tableswitch_padding() -> Result<()> {
        let mut list = InsnList::new();
        let default = list.new_label();
        let case = list.new_label();

        list.push_back(Insn::Push(PushValue::Int(0)));
        list.push_back(Insn::TableSwitch {
            low: 1,
            high: 1,
            default,
            targets: vec![case],
        });
        list.push_back(Insn::Label(case));
        list.push_back(Insn::Op(opcodes::NOP));
        list.push_back(Insn::Label(default));
        list.push_back(Insn::Op(opcodes::RETURN));

        let body = MethodBody {
            max_stack: 1,
            max_locals: 0,
            code: list,
            regions: vec![],
            extra_attributes: Attributes::empty(),
        };

        let mut pool = ConstantPool::new();
        let encoded = body.encode(&mut pool)?;

        assert_eq!(encoded.code[0], 0x03);
        assert_eq!(encoded.code[1], opcodes::TABLESWITCH);
        // iconst_0, then the switch (opcode, 2 pad bytes, 3 words, 1 target), nop, return
        assert_eq!(encoded.code.len(), 1 + 19 + 1 + 1);

        // And it decodes back to the same switch shape
        let decoded = decode_body(&encoded, &pool)?;
        let switch = decoded
            .code
            .iter()
            .find(|(_, i)| matches!(i, Insn::TableSwitch { .. }))
            .map(|(_, i)| i.clone())
            .expect("switch survives the round trip");
        assert!(matches!(switch, Insn::TableSwitch { low: 1, high: 1, .. }));

        Ok(())
    }

    #[test]
    fn it_rejects_subroutine_bytecode() {
        let pool = ConstantPool::new();
        // jsr +3; nop; ret 0
        let attr = empty_attr(vec![0xa8, 0x00, 0x03, 0x00, 0xa9, 0x00]);

        assert!(decode_body(&attr, &pool).is_err());
    }
}
