//! The wire contract between the transformer and the frame runtime: the flow
//! annotation, the sentinel attribute, and every member of the frame class
//! the woven code calls. These strings are stable; changing any of them
//! orphans previously woven classes.

/// Annotation marking a method as a flow method, in descriptor form as it
/// appears in annotation attributes.
pub const FLOW_ANNOTATION: &str = "Lweft/FlowMethod;";

/// The opt-out / already-transformed option on the flow annotation.
pub const MANUAL_ELEMENT: &str = "manual";

/// Zero-length class attribute marking a class as already woven.
pub const WOVEN_ATTRIBUTE: &str = "weft.Woven";

/// The runtime class the woven code talks to.
pub const FRAME_CLASS: &str = "weft/runtime/MethodFrame";
pub const FRAME_DESC: &str = "Lweft/runtime/MethodFrame;";

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";

/// A method of the frame protocol: name plus descriptor.
pub type ProtocolMethod = (&'static str, &'static str);

pub const ENTER: ProtocolMethod = (
    "enter",
    "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)Lweft/runtime/MethodFrame;",
);
pub const RESUME_POINT: ProtocolMethod = ("resumePoint", "()I");
pub const PREPARE: ProtocolMethod = ("prepare", "(II)Lweft/runtime/MethodFrame;");
pub const NOTIFY_INVOKE: ProtocolMethod = ("notifyInvoke", "(III)Lweft/runtime/MethodFrame;");

pub const SAVE_INT: ProtocolMethod = ("save", "(I)Lweft/runtime/MethodFrame;");
pub const SAVE_LONG: ProtocolMethod = ("save", "(J)Lweft/runtime/MethodFrame;");
pub const SAVE_FLOAT: ProtocolMethod = ("save", "(F)Lweft/runtime/MethodFrame;");
pub const SAVE_DOUBLE: ProtocolMethod = ("save", "(D)Lweft/runtime/MethodFrame;");
pub const SAVE_REFERENCE: ProtocolMethod =
    ("save", "(Ljava/lang/Object;)Lweft/runtime/MethodFrame;");

pub const RESTORE_INT: ProtocolMethod = ("restoreInt", "()I");
pub const RESTORE_LONG: ProtocolMethod = ("restoreLong", "()J");
pub const RESTORE_FLOAT: ProtocolMethod = ("restoreFloat", "()F");
pub const RESTORE_DOUBLE: ProtocolMethod = ("restoreDouble", "()D");
pub const RESTORE_REFERENCE: ProtocolMethod = ("restoreObject", "()Ljava/lang/Object;");

pub const IS_LEAVING: ProtocolMethod = ("isLeaving", "()Z");
pub const EXIT: ProtocolMethod = ("exit", "()V");
pub const EXIT_THROWING: ProtocolMethod = ("exit", "(Ljava/lang/Throwable;)V");

pub const MONITOR_ENTER: ProtocolMethod = ("monitorEnter", "(Ljava/lang/Object;)V");
pub const MONITOR_EXIT: ProtocolMethod = ("monitorExit", "(Ljava/lang/Object;)V");

pub const GET_RESULT_INT: ProtocolMethod = ("getResultInt", "()I");
pub const GET_RESULT_LONG: ProtocolMethod = ("getResultLong", "()J");
pub const GET_RESULT_FLOAT: ProtocolMethod = ("getResultFloat", "()F");
pub const GET_RESULT_DOUBLE: ProtocolMethod = ("getResultDouble", "()D");
pub const GET_RESULT_REFERENCE: ProtocolMethod = ("getResultObject", "()Ljava/lang/Object;");

/// Package roots the resolver never walks: the platform library and the
/// transformer's own runtime.
pub const DEFAULT_RESERVED_PREFIXES: &[&str] =
    &["java/", "javax/", "jdk/", "sun/", "com/sun/", "weft/"];
