use anyhow::Result;
use bytes::{BufMut, BytesMut};

use crate::classfile::ClassFile;
use crate::constants::MAGIC;
use crate::pool::ConstantEntry;

/// Serialise an editable class back to bytes, the mirror image of
/// [`crate::parser::Parser::parse`]. Anything the transformer did not touch
/// comes back out byte for byte.
pub struct Writer<'a> {
    class: &'a ClassFile,
}

impl<'a> Writer<'a> {
    pub fn new(class: &'a ClassFile) -> Self {
        Self { class }
    }

    fn write_constant_pool(&self, out: &mut BytesMut) {
        let pool = &self.class.constant_pool;
        out.put_u16(pool.count());

        let entries = pool.entries.read();
        for entry in entries.iter() {
            match entry {
                ConstantEntry::Utf8(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.bytes.len() as u16);
                    out.put_slice(&data.bytes);
                }
                ConstantEntry::Integer(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u32(data.bytes);
                }
                ConstantEntry::Float(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_f32(data.bytes);
                }
                ConstantEntry::Long(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u64(data.bytes);
                }
                ConstantEntry::Double(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_f64(data.bytes);
                }
                ConstantEntry::Class(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.name.index());
                }
                ConstantEntry::String(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.string.index());
                }
                ConstantEntry::Field(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.class.index());
                    out.put_u16(data.name_and_type.index());
                }
                ConstantEntry::Method(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.class.index());
                    out.put_u16(data.name_and_type.index());
                }
                ConstantEntry::InterfaceMethod(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.class.index());
                    out.put_u16(data.name_and_type.index());
                }
                ConstantEntry::NameAndType(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.name.index());
                    out.put_u16(data.descriptor.index());
                }
                ConstantEntry::MethodHandle(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u8(data.kind);
                    out.put_u16(data.index);
                }
                ConstantEntry::MethodType(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.descriptor.index());
                }
                ConstantEntry::Dynamic(data) | ConstantEntry::InvokeDynamic(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.bootstrap_index);
                    out.put_u16(data.name_and_type.index());
                }
                ConstantEntry::Module(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.name.index());
                }
                ConstantEntry::Package(data) => {
                    out.put_u8(data.tag.to_tag());
                    out.put_u16(data.name.index());
                }
                // The filler behind a 64 bit entry has no bytes of its own
                ConstantEntry::Reserved => {}
            }
        }
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();

        out.put_u32(MAGIC);
        out.put_u16(self.class.meta_data.minor_version);
        out.put_u16(self.class.meta_data.major_version);

        self.write_constant_pool(&mut out);

        out.put_u16(self.class.access_flags.bits());
        out.put_u16(self.class.this_class.index());
        out.put_u16(
            self.class
                .super_class
                .as_ref()
                .map(|s| s.index())
                .unwrap_or(0),
        );

        out.put_u16(self.class.interfaces.values.len() as u16);
        for interface in self.class.interfaces.values.iter() {
            out.put_u16(interface.index());
        }

        out.put_u16(self.class.fields.values.len() as u16);
        for field in self.class.fields.values.iter() {
            out.put_u16(field.flags.bits());
            out.put_u16(field.name.index());
            out.put_u16(field.descriptor.index());
            field.attributes.encode(&mut out);
        }

        out.put_u16(self.class.methods.values.len() as u16);
        for method in self.class.methods.values.iter() {
            out.put_u16(method.flags.bits());
            out.put_u16(method.name.index());
            out.put_u16(method.descriptor.index());
            method.attributes.encode(&mut out);
        }

        self.class.attributes.encode(&mut out);

        Ok(out.to_vec())
    }
}
