use std::{iter::Peekable, str::Chars};

use anyhow::{anyhow, Result};
use enum_as_inner::EnumAsInner;

/// <BaseType> ::= 'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z'
#[derive(EnumAsInner, Debug, PartialEq, Eq, Clone, Copy)]
pub enum BaseType {
    Boolean, // Z
    Char,    // C
    Float,   // F
    Double,  // D
    Byte,    // B
    Short,   // S
    Int,     // I
    Long,    // J
    Void,    // V
}

impl BaseType {
    /// Slot width on the operand stack and in the local variable table.
    pub fn width(&self) -> usize {
        match self {
            BaseType::Long | BaseType::Double => 2,
            BaseType::Void => 0,
            _ => 1,
        }
    }

    pub fn char(&self) -> char {
        match self {
            BaseType::Boolean => 'Z',
            BaseType::Char => 'C',
            BaseType::Float => 'F',
            BaseType::Double => 'D',
            BaseType::Byte => 'B',
            BaseType::Short => 'S',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Void => 'V',
        }
    }
}

impl ToString for BaseType {
    fn to_string(&self) -> String {
        self.char().to_string()
    }
}

/// <ObjectType> ::= 'L' <ClassName> ';'
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ObjectType {
    pub class_name: String,
}

impl ToString for ObjectType {
    fn to_string(&self) -> String {
        format!("L{};", self.class_name)
    }
}

/// <ArrayType> ::= '[' <FieldType>
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ArrayType {
    pub field_type: Box<FieldType>,
}

impl ToString for ArrayType {
    fn to_string(&self) -> String {
        format!("[{}", self.field_type.to_string())
    }
}

#[derive(EnumAsInner, Debug, PartialEq, Eq, Clone)]
pub enum FieldType {
    Base(BaseType),
    Object(ObjectType),
    Array(ArrayType),
}

impl FieldType {
    fn parse_from_iterator(chars: &mut Peekable<Chars>) -> Result<Self> {
        let first = chars.next().ok_or(anyhow!("no more chars"))?;

        Ok(match first {
            'B' => FieldType::Base(BaseType::Byte),
            'C' => FieldType::Base(BaseType::Char),
            'D' => FieldType::Base(BaseType::Double),
            'F' => FieldType::Base(BaseType::Float),
            'I' => FieldType::Base(BaseType::Int),
            'J' => FieldType::Base(BaseType::Long),
            'S' => FieldType::Base(BaseType::Short),
            'Z' => FieldType::Base(BaseType::Boolean),
            'V' => FieldType::Base(BaseType::Void),
            '[' => FieldType::Array(ArrayType {
                field_type: Box::new(FieldType::parse_from_iterator(chars)?),
            }),
            'L' => FieldType::Object(ObjectType {
                class_name: chars.take_while(|c| *c != ';').collect::<String>(),
            }),
            _ => return Err(anyhow!("unknown type {first}")),
        })
    }

    pub fn parse(str: String) -> Result<Self> {
        let chars = str.chars();
        FieldType::parse_from_iterator(&mut chars.peekable())
    }

    /// Slot width on the operand stack and in the local variable table.
    /// References and arrays are one slot, 64 bit primitives are two.
    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base) => base.width(),
            _ => 1,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, FieldType::Base(BaseType::Void))
    }
}

impl ToString for FieldType {
    fn to_string(&self) -> String {
        match self {
            FieldType::Base(base) => base.to_string(),
            FieldType::Object(object) => object.to_string(),
            FieldType::Array(array) => array.to_string(),
        }
    }
}

/// <MethodType> ::= '(' { <FieldType> } ')' <FieldType>
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MethodType {
    pub parameters: Vec<FieldType>,
    pub return_type: FieldType,
}

impl MethodType {
    pub fn parse(str: String) -> Result<Self> {
        let mut chars = str.chars().peekable();
        if chars.next() != Some('(') {
            return Err(anyhow!("descriptor did not start with ("));
        }

        let mut parameters = Vec::new();

        while chars.peek() != Some(&')') {
            parameters.push(FieldType::parse_from_iterator(&mut chars)?);
        }

        // Skip )
        chars.next();

        let return_type = FieldType::parse_from_iterator(&mut chars)?;

        Ok(MethodType {
            parameters,
            return_type,
        })
    }

    /// Total local variable slots the parameters occupy, not counting `this`.
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(|p| p.width()).sum()
    }

    /// The leading character of the return type, 'L' for any object type
    /// and '[' for any array type.
    pub fn return_char(&self) -> char {
        match &self.return_type {
            FieldType::Base(base) => base.char(),
            FieldType::Object(_) => 'L',
            FieldType::Array(_) => '[',
        }
    }
}

impl ToString for MethodType {
    fn to_string(&self) -> String {
        format!(
            "({}){}",
            self.parameters
                .iter()
                .map(|p| p.to_string())
                .collect::<String>(),
            self.return_type.to_string()
        )
    }
}
