use crate::{
    attributes::Attributes,
    flags::{ClassFileAccessFlags, FieldAccessFlags, MethodAccessFlags},
    pool::{
        ConstantClass, ConstantEntry, ConstantField, ConstantNameAndType, ConstantPool,
        ConstantUtf8,
    },
};
use anyhow::Result;
use parking_lot::RwLock;
use std::{fmt, marker::PhantomData, sync::Arc};

/// The editable form of one compiled class. Owned exclusively by a transform
/// call; the constant pool is append only so handles held by methods stay
/// valid while the rewriter interns new constants.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub constant_pool: ConstantPool,
    pub meta_data: MetaData,

    pub access_flags: ClassFileAccessFlags,
    pub this_class: Addressed<ConstantClass>,
    pub super_class: Option<Addressed<ConstantClass>>,

    pub interfaces: Interfaces,
    pub fields: Fields,
    pub methods: Methods,
    pub attributes: Attributes,
}

impl ClassFile {
    pub fn name(&self) -> Result<String> {
        self.this_class.try_resolve()?.name.try_resolve()?.try_string()
    }

    pub fn super_name(&self) -> Result<Option<String>> {
        match &self.super_class {
            Some(super_class) => Ok(Some(
                super_class.try_resolve()?.name.try_resolve()?.try_string()?,
            )),
            None => Ok(None),
        }
    }

    pub fn interface_names(&self) -> Result<Vec<String>> {
        self.interfaces
            .values
            .iter()
            .map(|i| i.try_resolve()?.name.try_resolve()?.try_string())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub flags: FieldAccessFlags,
    pub name: Addressed<ConstantUtf8>,
    pub descriptor: Addressed<ConstantUtf8>,
    pub attributes: Attributes,
}

#[derive(Debug, Clone)]
pub struct Fields {
    pub values: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub flags: MethodAccessFlags,
    pub name: Addressed<ConstantUtf8>,
    pub descriptor: Addressed<ConstantUtf8>,
    pub attributes: Attributes,
}

impl Method {
    pub fn name_string(&self) -> Result<String> {
        self.name.try_resolve()?.try_string()
    }

    pub fn descriptor_string(&self) -> Result<String> {
        self.descriptor.try_resolve()?.try_string()
    }

    pub fn is_static(&self) -> bool {
        self.flags.has(MethodAccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.has(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.flags.has(MethodAccessFlags::NATIVE)
    }
}

#[derive(Debug, Clone)]
pub struct Methods {
    pub values: Vec<Method>,
}

impl Methods {
    pub fn locate(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.values.iter().find(|v| {
            v.name_string().map(|n| n == name).unwrap_or(false)
                && v.descriptor_string()
                    .map(|d| d == descriptor)
                    .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone)]
pub struct Interfaces {
    pub values: Vec<Addressed<ConstantClass>>,
}

#[derive(Debug, Clone)]
pub struct MetaData {
    pub minor_version: u16,
    pub major_version: u16,
}

/// A typed handle to a constant pool slot. The handle stays valid for the
/// lifetime of the pool because entries are never removed or reordered.
#[derive(Clone)]
pub struct Addressed<T> {
    phantom: PhantomData<T>,

    index: u16,
    entries: Arc<RwLock<Vec<ConstantEntry>>>,
}

impl<T> Addressed<T> {
    pub fn from(index: u16, pool: Arc<RwLock<Vec<ConstantEntry>>>) -> Self {
        Self {
            phantom: PhantomData,
            index,
            entries: pool,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

impl<T> fmt::Debug for Addressed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addressed {{ {} }}", self.index)
    }
}

pub trait Resolvable<T> {
    fn resolve(&self) -> T {
        self.try_resolve().unwrap()
    }

    fn try_resolve(&self) -> Result<T>;
}

macro_rules! address {
    ($type: ty, $enum: ident) => {
        impl Resolvable<$type> for Addressed<$type> {
            fn try_resolve(&self) -> anyhow::Result<$type> {
                let entries = self.entries.read();
                let value = entries
                    .get((self.index as usize).wrapping_sub(1))
                    .ok_or(anyhow::anyhow!("no value found"))?;

                match value {
                    ConstantEntry::$enum(data) => Ok(data.clone()),
                    _ => {
                        return Err(anyhow::anyhow!(
                            "expected {} got type {:#?} @ {}",
                            stringify!($enum),
                            value,
                            self.index
                        ))
                    }
                }
            }
        }
    };
}

impl Resolvable<ConstantEntry> for Addressed<ConstantEntry> {
    fn try_resolve(&self) -> Result<ConstantEntry> {
        let pool = self.entries.read();
        let value = pool
            .get((self.index as usize).wrapping_sub(1))
            .ok_or(anyhow::anyhow!("no value found"))?;

        Ok(value.clone())
    }
}

address!(ConstantClass, Class);
address!(ConstantField, Field);
address!(ConstantNameAndType, NameAndType);
address!(ConstantUtf8, Utf8);
