use std::fmt;

/// A fully qualified method: owner internal name, method name, raw descriptor.
/// Keys the flow-method cache; equality is strict string equality, which is
/// what erased descriptors require.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    owner: String,
    name: String,
    descriptor: String,
}

impl MethodKey {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The same method as declared by a different class. The supertype walk
    /// substitutes owners while keeping name and descriptor.
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Constructors and class initialisers are never flow methods.
    pub fn is_initialiser(&self) -> bool {
        self.name.starts_with('<')
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}
