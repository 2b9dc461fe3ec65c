use anyhow::{anyhow, Result};
use support::descriptor::{BaseType, FieldType};

/// The verification type of one value. The 32 bit integral family collapses
/// to Int, matching the verifier; arrays carry their element descriptor so
/// aaload can recover the element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbstractType {
    /// Slot never written on this path.
    Bottom,
    Int,
    Float,
    Long,
    Double,
    /// A loaded object, by internal name.
    Reference(String),
    /// An array, by element descriptor.
    Array(String),
    Null,
    /// Result of `new` before its constructor ran, by class name.
    Uninitialised(String),
    /// Merge conflict or the second word of a 64 bit value.
    Top,
}

impl AbstractType {
    pub fn width(&self) -> usize {
        match self {
            AbstractType::Long | AbstractType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_uninitialised(&self) -> bool {
        matches!(self, AbstractType::Uninitialised(_))
    }

    pub fn is_reference_like(&self) -> bool {
        matches!(
            self,
            AbstractType::Reference(_) | AbstractType::Array(_) | AbstractType::Null
        )
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, AbstractType::Bottom | AbstractType::Top)
    }

    pub fn of_field_type(field: &FieldType) -> Result<Self> {
        Ok(match field {
            FieldType::Base(BaseType::Float) => AbstractType::Float,
            FieldType::Base(BaseType::Double) => AbstractType::Double,
            FieldType::Base(BaseType::Long) => AbstractType::Long,
            FieldType::Base(BaseType::Void) => {
                return Err(anyhow!("void is not a value type"))
            }
            FieldType::Base(_) => AbstractType::Int,
            FieldType::Object(object) => AbstractType::Reference(object.class_name.clone()),
            FieldType::Array(array) => AbstractType::Array(array.field_type.to_string()),
        })
    }

    pub fn of_descriptor(descriptor: &str) -> Result<Self> {
        Self::of_field_type(&FieldType::parse(descriptor.to_string())?)
    }

    /// From an internal name as found in a type operand, where array classes
    /// use descriptor form (`[I`, `[Ljava/lang/String;`).
    pub fn of_internal_name(name: &str) -> Self {
        if let Some(element) = name.strip_prefix('[') {
            AbstractType::Array(element.to_string())
        } else {
            AbstractType::Reference(name.to_string())
        }
    }

    /// Internal name to checkcast against; None for types a cast cannot
    /// narrow (null, Object itself).
    pub fn internal_name(&self) -> Option<String> {
        match self {
            AbstractType::Reference(name) => Some(name.clone()),
            AbstractType::Array(element) => Some(format!("[{}", element)),
            _ => None,
        }
    }
}

/// Types of the locals and the operand stack immediately before one
/// instruction. Locals are slot indexed (a 64 bit value occupies its slot
/// plus a Top filler); stack entries are whole values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractFrame {
    pub locals: Vec<AbstractType>,
    pub stack: Vec<AbstractType>,
}

impl AbstractFrame {
    pub fn new(max_locals: usize) -> Self {
        Self {
            locals: vec![AbstractType::Bottom; max_locals],
            stack: Vec::new(),
        }
    }

    pub fn stack_words(&self) -> usize {
        self.stack.iter().map(|t| t.width()).sum()
    }

    pub fn push(&mut self, ty: AbstractType) {
        self.stack.push(ty);
    }

    pub fn pop(&mut self) -> Result<AbstractType> {
        self.stack.pop().ok_or(anyhow!("operand stack underflow"))
    }

    pub fn pop_width(&mut self, width: usize) -> Result<AbstractType> {
        let value = self.pop()?;
        if value.width() != width {
            return Err(anyhow!(
                "expected a width {} value, popped {:?}",
                width,
                value
            ));
        }
        Ok(value)
    }

    pub fn pop_int(&mut self) -> Result<()> {
        match self.pop()? {
            AbstractType::Int => Ok(()),
            other => Err(anyhow!("expected int, popped {:?}", other)),
        }
    }

    pub fn pop_long(&mut self) -> Result<()> {
        match self.pop()? {
            AbstractType::Long => Ok(()),
            other => Err(anyhow!("expected long, popped {:?}", other)),
        }
    }

    pub fn pop_float(&mut self) -> Result<()> {
        match self.pop()? {
            AbstractType::Float => Ok(()),
            other => Err(anyhow!("expected float, popped {:?}", other)),
        }
    }

    pub fn pop_double(&mut self) -> Result<()> {
        match self.pop()? {
            AbstractType::Double => Ok(()),
            other => Err(anyhow!("expected double, popped {:?}", other)),
        }
    }

    pub fn pop_reference(&mut self) -> Result<AbstractType> {
        let value = self.pop()?;
        if value.is_reference_like() || value.is_uninitialised() {
            Ok(value)
        } else {
            Err(anyhow!("expected a reference, popped {:?}", value))
        }
    }

    /// Pop entries until they total exactly `words` stack words, returned
    /// bottom-up. The dup family is defined over word groups.
    pub fn take_words(&mut self, words: usize) -> Result<Vec<AbstractType>> {
        let mut taken = Vec::new();
        let mut count = 0;
        while count < words {
            let value = self.pop()?;
            count += value.width();
            taken.insert(0, value);
        }
        if count != words {
            return Err(anyhow!("a 64 bit value straddles a {} word group", words));
        }
        Ok(taken)
    }
}
