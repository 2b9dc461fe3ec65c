use crate::{
    classfile::{Addressed, Resolvable},
    constants,
    pool::{ConstantPool, ConstantUtf8},
};
use anyhow::{anyhow, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use support::bytes_ext::SafeBuf;

/// An attribute the transformer does not necessarily understand. The payload
/// is kept verbatim so unknown attributes survive a load/emit round trip.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Addressed<ConstantUtf8>,
    pub data: Vec<u8>,
}

impl Attribute {
    pub fn name_string(&self) -> Result<String> {
        self.name.try_resolve()?.try_string()
    }
}

#[derive(Debug, Clone)]
pub struct Attributes {
    pub values: Vec<Attribute>,
}

impl Attributes {
    pub fn empty() -> Self {
        Self { values: vec![] }
    }

    pub fn parse(bytes: &mut Bytes, constant_pool: &ConstantPool) -> Result<Self> {
        let length = bytes.try_get_u16()?;
        let mut attributes = Attributes {
            values: Vec::with_capacity(length.into()),
        };

        for _ in 0..length {
            let name = constant_pool.address(bytes.try_get_u16()?);
            let attr_length = bytes.try_get_u32()?;

            if bytes.remaining() < attr_length as usize {
                return Err(anyhow!("attribute payload out of bounds"));
            }

            let info = bytes.split_to(attr_length as usize).to_vec();
            attributes.values.push(Attribute { name, data: info });
        }

        Ok(attributes)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16(self.values.len() as u16);
        for attr in self.values.iter() {
            out.put_u16(attr.name.index());
            out.put_u32(attr.data.len() as u32);
            out.put_slice(&attr.data);
        }
    }

    pub fn find(&self, id: &str) -> Option<&Attribute> {
        self.values
            .iter()
            .find(|attr| attr.name_string().map(|n| n == id).unwrap_or(false))
    }

    pub fn has(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Replace the first attribute with the given identifier, or append a new
    /// one. The identifier is interned into the pool on append.
    pub fn put(&mut self, pool: &mut ConstantPool, id: &str, data: Vec<u8>) {
        for attr in self.values.iter_mut() {
            if attr.name_string().map(|n| n == id).unwrap_or(false) {
                attr.data = data;
                return;
            }
        }

        let index = pool.utf8(id);
        let name = pool.address(index);
        self.values.push(Attribute { name, data });
    }

    pub fn remove(&mut self, id: &str) {
        self.values
            .retain(|attr| attr.name_string().map(|n| n != id).unwrap_or(true));
    }

    pub fn known_attribute<T>(&self, constant_pool: &ConstantPool) -> Result<T>
    where
        T: KnownAttribute,
    {
        let attr = self
            .find(T::id())
            .ok_or(anyhow!("could not locate known attribute {}", T::id()))?;

        let bytes = Bytes::copy_from_slice(&attr.data);
        T::decode(bytes, constant_pool)
    }
}

pub trait KnownAttribute
where
    Self: Sized,
{
    fn decode(bytes: Bytes, constant_pool: &ConstantPool) -> Result<Self>;
    fn encode(&self, constant_pool: &mut ConstantPool) -> Result<Vec<u8>>;
    fn id() -> &'static str;
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Attributes,
}

/// One protected region of a method body, in raw program counter form.
/// `catch_type` 0 is the catch-all used by finally blocks.
#[derive(Debug, Clone)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl KnownAttribute for CodeAttribute {
    fn decode(mut bytes: Bytes, constant_pool: &ConstantPool) -> Result<Self> {
        let max_stack = bytes.try_get_u16()?;
        let max_locals = bytes.try_get_u16()?;

        let code_length = bytes.try_get_u32()?;
        if bytes.remaining() < code_length as usize {
            return Err(anyhow!("code payload out of bounds"));
        }
        let code = bytes.split_to(code_length as usize).to_vec();

        let exception_length = bytes.try_get_u16()?;
        let mut exception_table: Vec<ExceptionEntry> = Vec::with_capacity(exception_length.into());
        for _ in 0..exception_length {
            exception_table.push(ExceptionEntry {
                start_pc: bytes.try_get_u16()?,
                end_pc: bytes.try_get_u16()?,
                handler_pc: bytes.try_get_u16()?,
                catch_type: bytes.try_get_u16()?,
            })
        }
        let attributes = Attributes::parse(&mut bytes, constant_pool)?;

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn encode(&self, _constant_pool: &mut ConstantPool) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        out.put_u16(self.max_stack);
        out.put_u16(self.max_locals);
        out.put_u32(self.code.len() as u32);
        out.put_slice(&self.code);

        out.put_u16(self.exception_table.len() as u16);
        for entry in self.exception_table.iter() {
            out.put_u16(entry.start_pc);
            out.put_u16(entry.end_pc);
            out.put_u16(entry.handler_pc);
            out.put_u16(entry.catch_type);
        }

        self.attributes.encode(&mut out);
        Ok(out.to_vec())
    }

    fn id() -> &'static str {
        constants::CODE
    }
}

#[derive(Debug, Clone, Default)]
pub struct LineNumberTableAttribute {
    pub entries: Vec<LineNumberEntry>,
}

#[derive(Debug, Clone)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line: u16,
}

impl KnownAttribute for LineNumberTableAttribute {
    fn decode(mut bytes: Bytes, _constant_pool: &ConstantPool) -> Result<Self> {
        let length = bytes.try_get_u16()?;
        let mut entries = Vec::with_capacity(length.into());

        for _ in 0..length {
            entries.push(LineNumberEntry {
                start_pc: bytes.try_get_u16()?,
                line: bytes.try_get_u16()?,
            });
        }

        Ok(LineNumberTableAttribute { entries })
    }

    fn encode(&self, _constant_pool: &mut ConstantPool) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        out.put_u16(self.entries.len() as u16);
        for entry in self.entries.iter() {
            out.put_u16(entry.start_pc);
            out.put_u16(entry.line);
        }
        Ok(out.to_vec())
    }

    fn id() -> &'static str {
        constants::LINE_NUMBER_TABLE
    }
}
