use std::sync::Arc;

use anyhow::{anyhow, Result};
use enum_as_inner::EnumAsInner;
use parking_lot::RwLock;

use crate::classfile::Addressed;
use crate::classfile::Resolvable;

/// The constant pool of one class. Entries are append only: the rewriter
/// interns new constants while instruction positions still hold `Addressed`
/// handles, and appending never invalidates an existing index.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    pub entries: Arc<RwLock<Vec<ConstantEntry>>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(vec![])),
        }
    }

    pub fn insert(&mut self, entry: ConstantEntry) {
        let mut pool = self.entries.write();
        pool.push(entry)
    }

    pub fn get(&self, index: u16) -> Option<ConstantEntry> {
        let pool = self.entries.read();
        pool.get((index as usize).wrapping_sub(1)).cloned()
    }

    pub fn address<T>(&self, for_index: u16) -> Addressed<T> {
        Addressed::from(for_index, Arc::clone(&self.entries))
    }

    /// Number of index slots the pool occupies, i.e. the value written to the
    /// constant_pool_count field (one larger than the last valid index).
    pub fn count(&self) -> u16 {
        (self.entries.read().len() + 1) as u16
    }

    pub fn entry_at(&self, index: u16) -> Result<ConstantEntry> {
        self.get(index)
            .ok_or(anyhow!("no constant pool entry at {}", index))
    }

    pub fn utf8_at(&self, index: u16) -> Result<String> {
        match self.entry_at(index)? {
            ConstantEntry::Utf8(data) => data.try_string(),
            e => Err(anyhow!("expected Utf8 at {}, got {:?}", index, e)),
        }
    }

    pub fn class_name_at(&self, index: u16) -> Result<String> {
        match self.entry_at(index)? {
            ConstantEntry::Class(data) => data.name.try_resolve()?.try_string(),
            e => Err(anyhow!("expected Class at {}, got {:?}", index, e)),
        }
    }

    fn push(&mut self, entry: ConstantEntry) -> u16 {
        let mut pool = self.entries.write();
        pool.push(entry);
        pool.len() as u16
    }

    /// Intern a Utf8 entry, reusing an existing one with the same bytes.
    pub fn utf8(&mut self, value: &str) -> u16 {
        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Utf8(data) = entry {
                    if data.bytes == value.as_bytes() {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        self.push(ConstantEntry::Utf8(ConstantUtf8 {
            tag: ConstantTag::Utf8,
            length: value.len() as u16,
            bytes: value.as_bytes().to_vec(),
        }))
    }

    pub fn class(&mut self, internal_name: &str) -> u16 {
        let name = self.utf8(internal_name);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Class(data) = entry {
                    if data.name.index() == name {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let addressed = self.address(name);
        self.push(ConstantEntry::Class(ConstantClass {
            tag: ConstantTag::Class,
            name: addressed,
        }))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let utf8 = self.utf8(value);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::String(data) = entry {
                    if data.string.index() == utf8 {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let addressed = self.address(utf8);
        self.push(ConstantEntry::String(ConstantString {
            tag: ConstantTag::String,
            string: addressed,
        }))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Integer(data) = entry {
                    if data.bytes == value as u32 {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        self.push(ConstantEntry::Integer(ConstantInteger {
            tag: ConstantTag::Integer,
            bytes: value as u32,
        }))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Float(data) = entry {
                    if data.bytes.to_bits() == value.to_bits() {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        self.push(ConstantEntry::Float(ConstantFloat {
            tag: ConstantTag::Float,
            bytes: value,
        }))
    }

    /// 64 bit entries take two index slots; the entry is followed by a
    /// reserved filler.
    pub fn long(&mut self, value: i64) -> u16 {
        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Long(data) = entry {
                    if data.bytes == value as u64 {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let index = self.push(ConstantEntry::Long(ConstantLong {
            tag: ConstantTag::Long,
            bytes: value as u64,
        }));
        self.push(ConstantEntry::Reserved);
        index
    }

    pub fn double(&mut self, value: f64) -> u16 {
        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Double(data) = entry {
                    if data.bytes.to_bits() == value.to_bits() {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let index = self.push(ConstantEntry::Double(ConstantDouble {
            tag: ConstantTag::Double,
            bytes: value,
        }));
        self.push(ConstantEntry::Reserved);
        index
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::NameAndType(data) = entry {
                    if data.name.index() == name_index
                        && data.descriptor.index() == descriptor_index
                    {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let name = self.address(name_index);
        let descriptor = self.address(descriptor_index);
        self.push(ConstantEntry::NameAndType(ConstantNameAndType {
            tag: ConstantTag::NameAndType,
            name,
            descriptor,
        }))
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let nat_index = self.name_and_type(name, descriptor);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Method(data) = entry {
                    if data.class.index() == class_index
                        && data.name_and_type.index() == nat_index
                    {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let class = self.address(class_index);
        let name_and_type = self.address(nat_index);
        self.push(ConstantEntry::Method(ConstantMethod {
            tag: ConstantTag::Method,
            class,
            name_and_type,
        }))
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let nat_index = self.name_and_type(name, descriptor);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::InterfaceMethod(data) = entry {
                    if data.class.index() == class_index
                        && data.name_and_type.index() == nat_index
                    {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let class = self.address(class_index);
        let name_and_type = self.address(nat_index);
        self.push(ConstantEntry::InterfaceMethod(ConstantInterfaceMethod {
            tag: ConstantTag::InterfaceMethod,
            class,
            name_and_type,
        }))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let nat_index = self.name_and_type(name, descriptor);

        {
            let pool = self.entries.read();
            for (i, entry) in pool.iter().enumerate() {
                if let ConstantEntry::Field(data) = entry {
                    if data.class.index() == class_index
                        && data.name_and_type.index() == nat_index
                    {
                        return (i + 1) as u16;
                    }
                }
            }
        }

        let class = self.address(class_index);
        let name_and_type = self.address(nat_index);
        self.push(ConstantEntry::Field(ConstantField {
            tag: ConstantTag::Field,
            class,
            name_and_type,
        }))
    }

    pub(crate) fn perform_format_checking(&self) -> Result<()> {
        let entries = self.entries.read();
        for item in entries.iter() {
            match item {
                ConstantEntry::Class(data) => {
                    data.name.try_resolve()?;
                }
                ConstantEntry::Field(data) => {
                    data.class.try_resolve()?;
                    data.name_and_type.try_resolve()?;
                }
                ConstantEntry::Method(data) => {
                    data.class.try_resolve()?;
                    data.name_and_type.try_resolve()?;
                }
                ConstantEntry::InterfaceMethod(data) => {
                    data.class.try_resolve()?;
                    data.name_and_type.try_resolve()?;
                }
                ConstantEntry::String(data) => {
                    data.string.try_resolve()?;
                }
                ConstantEntry::NameAndType(data) => {
                    data.name.try_resolve()?;
                    data.descriptor.try_resolve()?;
                }
                ConstantEntry::MethodType(data) => {
                    data.descriptor.try_resolve()?;
                }
                ConstantEntry::Dynamic(data) | ConstantEntry::InvokeDynamic(data) => {
                    data.name_and_type.try_resolve()?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantTag {
    Class,
    Field,
    Method,
    InterfaceMethod,
    String,
    Integer,
    Float,
    Long,
    Double,
    NameAndType,
    Utf8,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}

impl ConstantTag {
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => ConstantTag::Utf8,
            3 => ConstantTag::Integer,
            4 => ConstantTag::Float,
            5 => ConstantTag::Long,
            6 => ConstantTag::Double,
            7 => ConstantTag::Class,
            8 => ConstantTag::String,
            9 => ConstantTag::Field,
            10 => ConstantTag::Method,
            11 => ConstantTag::InterfaceMethod,
            12 => ConstantTag::NameAndType,
            15 => ConstantTag::MethodHandle,
            16 => ConstantTag::MethodType,
            17 => ConstantTag::Dynamic,
            18 => ConstantTag::InvokeDynamic,
            19 => ConstantTag::Module,
            20 => ConstantTag::Package,
            _ => return Err(anyhow!("{} is an unknown constant tag", tag)),
        })
    }

    pub fn to_tag(self) -> u8 {
        match self {
            ConstantTag::Utf8 => 1,
            ConstantTag::Integer => 3,
            ConstantTag::Float => 4,
            ConstantTag::Long => 5,
            ConstantTag::Double => 6,
            ConstantTag::Class => 7,
            ConstantTag::String => 8,
            ConstantTag::Field => 9,
            ConstantTag::Method => 10,
            ConstantTag::InterfaceMethod => 11,
            ConstantTag::NameAndType => 12,
            ConstantTag::MethodHandle => 15,
            ConstantTag::MethodType => 16,
            ConstantTag::Dynamic => 17,
            ConstantTag::InvokeDynamic => 18,
            ConstantTag::Module => 19,
            ConstantTag::Package => 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstantClass {
    pub tag: ConstantTag,
    pub name: Addressed<ConstantUtf8>,
}

#[derive(Debug, Clone)]
pub struct ConstantField {
    pub tag: ConstantTag,
    pub class: Addressed<ConstantClass>,
    pub name_and_type: Addressed<ConstantNameAndType>,
}

#[derive(Debug, Clone)]
pub struct ConstantMethod {
    pub tag: ConstantTag,
    pub class: Addressed<ConstantClass>,
    pub name_and_type: Addressed<ConstantNameAndType>,
}

#[derive(Debug, Clone)]
pub struct ConstantInterfaceMethod {
    pub tag: ConstantTag,
    pub class: Addressed<ConstantClass>,
    pub name_and_type: Addressed<ConstantNameAndType>,
}

#[derive(Debug, Clone)]
pub struct ConstantString {
    pub tag: ConstantTag,
    pub string: Addressed<ConstantUtf8>,
}

#[derive(Debug, Clone)]
pub struct ConstantInteger {
    pub tag: ConstantTag,
    pub bytes: u32,
}

#[derive(Debug, Clone)]
pub struct ConstantFloat {
    pub tag: ConstantTag,
    pub bytes: f32,
}

#[derive(Debug, Clone)]
pub struct ConstantLong {
    pub tag: ConstantTag,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ConstantDouble {
    pub tag: ConstantTag,
    pub bytes: f64,
}

#[derive(Debug, Clone)]
pub struct ConstantNameAndType {
    pub tag: ConstantTag,
    pub name: Addressed<ConstantUtf8>,
    pub descriptor: Addressed<ConstantUtf8>,
}

#[derive(Debug, Clone)]
pub struct ConstantUtf8 {
    pub tag: ConstantTag,
    pub length: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ConstantMethodHandle {
    pub tag: ConstantTag,
    pub kind: u8,
    pub index: u16,
}

#[derive(Debug, Clone)]
pub struct ConstantMethodType {
    pub tag: ConstantTag,
    pub descriptor: Addressed<ConstantUtf8>,
}

#[derive(Debug, Clone)]
pub struct ConstantDynamic {
    pub tag: ConstantTag,
    pub bootstrap_index: u16,
    pub name_and_type: Addressed<ConstantNameAndType>,
}

#[derive(Debug, Clone)]
pub struct ConstantModule {
    pub tag: ConstantTag,
    pub name: Addressed<ConstantUtf8>,
}

#[derive(Debug, Clone)]
pub struct ConstantPackage {
    pub tag: ConstantTag,
    pub name: Addressed<ConstantUtf8>,
}

impl ConstantUtf8 {
    pub fn string(self) -> String {
        String::from_utf8(self.bytes).unwrap()
    }

    pub fn try_string(self) -> Result<String> {
        Ok(String::from_utf8(self.bytes)?)
    }
}

impl ConstantString {
    pub fn try_string(&self) -> Result<String> {
        Ok(String::from_utf8(self.string.try_resolve()?.bytes)?)
    }
}

#[derive(EnumAsInner, Clone, Debug)]
pub enum ConstantEntry {
    Class(ConstantClass),
    Field(ConstantField),
    Method(ConstantMethod),
    InterfaceMethod(ConstantInterfaceMethod),
    String(ConstantString),
    Integer(ConstantInteger),
    Float(ConstantFloat),
    Long(ConstantLong),
    Double(ConstantDouble),
    NameAndType(ConstantNameAndType),
    Utf8(ConstantUtf8),
    MethodHandle(ConstantMethodHandle),
    MethodType(ConstantMethodType),
    Dynamic(ConstantDynamic),
    InvokeDynamic(ConstantDynamic),
    Module(ConstantModule),
    Package(ConstantPackage),
    Reserved,
}
