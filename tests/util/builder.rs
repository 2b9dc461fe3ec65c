//! Assembles class containers in memory. The transformer consumes compiled
//! bytes, so the tests build them directly from the instruction model
//! instead of shipping fixture files.

use anyhow::Result;
use parse::annotations::{Annotation, VisibleAnnotations};
use parse::attributes::{Attributes, KnownAttribute};
use parse::classfile::{ClassFile, Fields, Interfaces, MetaData, Method, Methods};
use parse::codec::{MethodBody, Region};
use parse::constants;
use parse::flags::{ClassFileAccessFlags, MethodAccessFlags};
use parse::insn::InsnList;
use parse::pool::ConstantPool;
use parse::writer::Writer;
use weaver::protocol;

pub struct MethodSpec {
    pub flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    pub body: Option<MethodBody>,
    pub flow: bool,
    pub manual: Option<bool>,
}

impl MethodSpec {
    pub fn new(name: &str, descriptor: &str) -> Self {
        Self {
            flags: MethodAccessFlags::PUBLIC,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            body: None,
            flow: false,
            manual: None,
        }
    }

    pub fn flags(mut self, flags: MethodAccessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn flow(mut self) -> Self {
        self.flow = true;
        self
    }

    pub fn manual(mut self, value: bool) -> Self {
        self.manual = Some(value);
        self
    }

    pub fn body(mut self, max_stack: u16, max_locals: u16, build: impl FnOnce(&mut InsnList)) -> Self {
        let mut code = InsnList::new();
        build(&mut code);
        self.body = Some(MethodBody {
            max_stack,
            max_locals,
            code,
            regions: vec![],
            extra_attributes: Attributes::empty(),
        });
        self
    }

    pub fn regions(mut self, regions: Vec<Region>) -> Self {
        if let Some(body) = &mut self.body {
            body.regions = regions;
        }
        self
    }
}

pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access: ClassFileAccessFlags,
    methods: Vec<MethodSpec>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: vec![],
            access: ClassFileAccessFlags::PUBLIC | ClassFileAccessFlags::SUPER,
            methods: vec![],
        }
    }

    pub fn interface(mut self) -> Self {
        self.access = ClassFileAccessFlags::PUBLIC
            | ClassFileAccessFlags::INTERFACE
            | ClassFileAccessFlags::ABSTRACT;
        self
    }

    pub fn extends(mut self, name: &str) -> Self {
        self.super_name = Some(name.to_string());
        self
    }

    pub fn implements(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn method(mut self, spec: MethodSpec) -> Self {
        self.methods.push(spec);
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let mut pool = ConstantPool::new();

        let this_index = pool.class(&self.name);
        let super_index = self.super_name.as_ref().map(|s| pool.class(s));
        let interface_indices: Vec<u16> =
            self.interfaces.iter().map(|i| pool.class(i)).collect();

        let mut methods = Vec::with_capacity(self.methods.len());
        for spec in self.methods {
            let name_index = pool.utf8(&spec.name);
            let descriptor_index = pool.utf8(&spec.descriptor);

            let mut attributes = Attributes::empty();
            if let Some(body) = &spec.body {
                let code = body.encode(&mut pool)?;
                let data = code.encode(&mut pool)?;
                attributes.put(&mut pool, constants::CODE, data);
            }
            if spec.flow {
                let mut annotation = Annotation::new(protocol::FLOW_ANNOTATION);
                if let Some(manual) = spec.manual {
                    annotation.set_bool_element(&mut pool, protocol::MANUAL_ELEMENT, manual);
                }
                let set = VisibleAnnotations {
                    annotations: vec![annotation],
                };
                let data = set.encode(&mut pool)?;
                attributes.put(&mut pool, constants::RUNTIME_VISIBLE_ANNOTATIONS, data);
            }

            methods.push(Method {
                flags: spec.flags,
                name: pool.address(name_index),
                descriptor: pool.address(descriptor_index),
                attributes,
            });
        }

        let class = ClassFile {
            this_class: pool.address(this_index),
            super_class: super_index.map(|i| pool.address(i)),
            interfaces: Interfaces {
                values: interface_indices.iter().map(|i| pool.address(*i)).collect(),
            },
            fields: Fields { values: vec![] },
            methods: Methods { values: methods },
            attributes: Attributes::empty(),
            access_flags: self.access,
            meta_data: MetaData {
                minor_version: 0,
                major_version: 49,
            },
            constant_pool: pool,
        };

        Writer::new(&class).write()
    }
}
