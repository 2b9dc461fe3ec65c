/// The first four bytes of every class file.
pub const MAGIC: u32 = 0xCAFEBABE;

/// Attribute identifiers the transformer understands.
pub const CODE: &str = "Code";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
