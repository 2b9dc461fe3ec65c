use crate::{
    constants,
    attributes::KnownAttribute,
    pool::{ConstantEntry, ConstantPool},
};
use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};
use support::bytes_ext::SafeBuf;

/// One runtime annotation, with its element values resolved to strings where
/// the format stores symbol indices. Constant-valued elements keep their pool
/// index; the pool is append only so the index stays valid across a rewrite.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub type_descriptor: String,
    pub pairs: Vec<ElementPair>,
}

#[derive(Debug, Clone)]
pub struct ElementPair {
    pub name: String,
    pub value: ElementValue,
}

#[derive(Debug, Clone)]
pub enum ElementValue {
    Const { tag: u8, index: u16 },
    Enum { type_name: String, const_name: String },
    Class(String),
    Nested(Box<Annotation>),
    Array(Vec<ElementValue>),
}

impl Annotation {
    pub fn new(type_descriptor: impl Into<String>) -> Self {
        Self {
            type_descriptor: type_descriptor.into(),
            pairs: vec![],
        }
    }

    /// Read a boolean element, following the constant pool reference.
    /// Absent elements answer None; the annotation default applies.
    pub fn bool_element(&self, pool: &ConstantPool, name: &str) -> Result<Option<bool>> {
        for pair in self.pairs.iter() {
            if pair.name != name {
                continue;
            }

            return match &pair.value {
                ElementValue::Const { index, .. } => match pool.entry_at(*index)? {
                    ConstantEntry::Integer(data) => Ok(Some(data.bytes != 0)),
                    e => Err(anyhow!("boolean element backed by {:?}", e)),
                },
                e => Err(anyhow!("boolean element with value {:?}", e)),
            };
        }

        Ok(None)
    }

    /// Write a boolean element in place, appending the pair if absent.
    pub fn set_bool_element(&mut self, pool: &mut ConstantPool, name: &str, value: bool) {
        let index = pool.integer(value as i32);
        let element = ElementValue::Const { tag: b'Z', index };

        for pair in self.pairs.iter_mut() {
            if pair.name == name {
                pair.value = element;
                return;
            }
        }

        self.pairs.push(ElementPair {
            name: name.to_string(),
            value: element,
        });
    }

    fn decode(bytes: &mut Bytes, pool: &ConstantPool) -> Result<Self> {
        let type_descriptor = pool.utf8_at(bytes.try_get_u16()?)?;
        let pair_count = bytes.try_get_u16()?;

        let mut pairs = Vec::with_capacity(pair_count.into());
        for _ in 0..pair_count {
            let name = pool.utf8_at(bytes.try_get_u16()?)?;
            let value = ElementValue::decode(bytes, pool)?;
            pairs.push(ElementPair { name, value });
        }

        Ok(Annotation {
            type_descriptor,
            pairs,
        })
    }

    fn encode(&self, out: &mut BytesMut, pool: &mut ConstantPool) {
        out.put_u16(pool.utf8(&self.type_descriptor));
        out.put_u16(self.pairs.len() as u16);

        for pair in self.pairs.iter() {
            out.put_u16(pool.utf8(&pair.name));
            pair.value.encode(out, pool);
        }
    }
}

impl ElementValue {
    fn decode(bytes: &mut Bytes, pool: &ConstantPool) -> Result<Self> {
        let tag = bytes.try_get_u8()?;

        Ok(match tag {
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
                tag,
                index: bytes.try_get_u16()?,
            },
            b'e' => ElementValue::Enum {
                type_name: pool.utf8_at(bytes.try_get_u16()?)?,
                const_name: pool.utf8_at(bytes.try_get_u16()?)?,
            },
            b'c' => ElementValue::Class(pool.utf8_at(bytes.try_get_u16()?)?),
            b'@' => ElementValue::Nested(Box::new(Annotation::decode(bytes, pool)?)),
            b'[' => {
                let count = bytes.try_get_u16()?;
                let mut values = Vec::with_capacity(count.into());
                for _ in 0..count {
                    values.push(ElementValue::decode(bytes, pool)?);
                }
                ElementValue::Array(values)
            }
            _ => return Err(anyhow!("unknown element value tag {}", tag)),
        })
    }

    fn encode(&self, out: &mut BytesMut, pool: &mut ConstantPool) {
        match self {
            ElementValue::Const { tag, index } => {
                out.put_u8(*tag);
                out.put_u16(*index);
            }
            ElementValue::Enum {
                type_name,
                const_name,
            } => {
                out.put_u8(b'e');
                out.put_u16(pool.utf8(type_name));
                out.put_u16(pool.utf8(const_name));
            }
            ElementValue::Class(descriptor) => {
                out.put_u8(b'c');
                out.put_u16(pool.utf8(descriptor));
            }
            ElementValue::Nested(annotation) => {
                out.put_u8(b'@');
                annotation.encode(out, pool);
            }
            ElementValue::Array(values) => {
                out.put_u8(b'[');
                out.put_u16(values.len() as u16);
                for value in values.iter() {
                    value.encode(out, pool);
                }
            }
        }
    }
}

fn decode_set(mut bytes: Bytes, pool: &ConstantPool) -> Result<Vec<Annotation>> {
    let count = bytes.try_get_u16()?;
    let mut annotations = Vec::with_capacity(count.into());

    for _ in 0..count {
        annotations.push(Annotation::decode(&mut bytes, pool)?);
    }

    Ok(annotations)
}

fn encode_set(annotations: &[Annotation], pool: &mut ConstantPool) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u16(annotations.len() as u16);

    for annotation in annotations.iter() {
        annotation.encode(&mut out, pool);
    }

    out.to_vec()
}

#[derive(Debug, Clone, Default)]
pub struct VisibleAnnotations {
    pub annotations: Vec<Annotation>,
}

impl KnownAttribute for VisibleAnnotations {
    fn decode(bytes: Bytes, constant_pool: &ConstantPool) -> Result<Self> {
        Ok(Self {
            annotations: decode_set(bytes, constant_pool)?,
        })
    }

    fn encode(&self, constant_pool: &mut ConstantPool) -> Result<Vec<u8>> {
        Ok(encode_set(&self.annotations, constant_pool))
    }

    fn id() -> &'static str {
        constants::RUNTIME_VISIBLE_ANNOTATIONS
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvisibleAnnotations {
    pub annotations: Vec<Annotation>,
}

impl KnownAttribute for InvisibleAnnotations {
    fn decode(bytes: Bytes, constant_pool: &ConstantPool) -> Result<Self> {
        Ok(Self {
            annotations: decode_set(bytes, constant_pool)?,
        })
    }

    fn encode(&self, constant_pool: &mut ConstantPool) -> Result<Vec<u8>> {
        Ok(encode_set(&self.annotations, constant_pool))
    }

    fn id() -> &'static str {
        constants::RUNTIME_INVISIBLE_ANNOTATIONS
    }
}
