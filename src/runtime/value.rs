//! The tagged dynamic value.
//!
//! Heap-owning tags hold shared handles so registers, globals, constants
//! and object fields can alias the same array/object/instance; bytecode
//! functions alias the chunk that defines them through `Rc<Chunk>`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::Chunk;
use crate::runtime::object::{Class, Instance, ObjectMap};
use crate::vm::{RuntimeError, Vm};

/// Host-native function. Arguments arrive as a copied slice of the caller's
/// argument registers; the returned value is stored by the VM into the
/// callee's own register, the slot just below the arguments.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub enum Value {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Nil,
    Native(NativeFn),
    Function(Rc<Chunk>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Class(Rc<RefCell<Class>>),
    Instance(Rc<RefCell<Instance>>),
}

/// Rendering depth cap for nested containers; cyclic structures bottom out
/// as "..." instead of recursing forever.
const MAX_RENDER_DEPTH: usize = 8;

impl Value {
    pub fn from_string(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn new_array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn new_object(map: ObjectMap) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Stable tag number, part of the host ABI.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Number(_) => 0,
            Value::Str(_) => 1,
            Value::Bool(_) => 2,
            Value::Nil => 3,
            Value::Native(_) => 4,
            Value::Function(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
            Value::Class(_) => 8,
            Value::Instance(_) => 9,
        }
    }

    /// Type name as reported by the `tipe` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "angka",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Native(_) => "native",
            Value::Function(_) => "fungsi",
            Value::Array(_) => "array",
            Value::Object(_) | Value::Class(_) | Value::Instance(_) => "objek",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Language-level equality: numbers, strings, bools and nil by value,
    /// everything else by identity. Cross-tag comparisons are false.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Native(a), Value::Native(b)) => std::ptr::fn_addr_eq(*a, *b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// User-facing rendering used by `print`/`println` and string
    /// concatenation.
    pub fn to_output(&self) -> String {
        self.render(0)
    }

    fn render(&self, depth: usize) -> String {
        if depth > MAX_RENDER_DEPTH {
            return "...".to_string();
        }
        match self {
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Bool(true) => "true".to_string(),
            Value::Bool(false) => "false".to_string(),
            Value::Nil => "nil".to_string(),
            Value::Native(_) => "[Native]".to_string(),
            Value::Function(_) => "[Function]".to_string(),
            Value::Array(elements) => {
                let rendered: Vec<String> = elements
                    .borrow()
                    .iter()
                    .map(|v| v.render(depth + 1))
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Object(map) => render_map(&map.borrow(), depth),
            Value::Class(class) => format!("[Kelas {}]", class.borrow().name),
            Value::Instance(instance) => {
                let instance = instance.borrow();
                format!(
                    "{} {}",
                    instance.class.borrow().name,
                    render_map(&instance.fields, depth)
                )
            }
        }
    }
}

fn render_map(map: &ObjectMap, depth: usize) -> String {
    let rendered: Vec<String> = map
        .entries()
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v.render(depth + 1)))
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

/// Integral values print without a decimal point; everything else uses the
/// shortest f64 form.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_language_rules() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::from_string("").is_truthy());
        assert!(Value::new_array(Vec::new()).is_truthy());
    }

    #[test]
    fn numbers_print_without_trailing_zero() {
        assert_eq!(Value::Number(7.0).to_output(), "7");
        assert_eq!(Value::Number(36.5).to_output(), "36.5");
        assert_eq!(Value::Number(-3.0).to_output(), "-3");
        assert_eq!(Value::Number(0.0).to_output(), "0");
    }

    #[test]
    fn equality_is_by_value_for_scalars_and_identity_for_heap() {
        assert!(Value::Number(2.0).equals(&Value::Number(2.0)));
        assert!(Value::from_string("a").equals(&Value::from_string("a")));
        assert!(Value::Nil.equals(&Value::Nil));
        assert!(!Value::Number(0.0).equals(&Value::Nil));

        let a = Value::new_array(vec![Value::Number(1.0)]);
        let b = Value::new_array(vec![Value::Number(1.0)]);
        assert!(a.equals(&a.clone()));
        assert!(!a.equals(&b));
    }

    #[test]
    fn containers_render_their_contents() {
        let array = Value::new_array(vec![Value::Number(1.0), Value::from_string("x")]);
        assert_eq!(array.to_output(), "[1, x]");

        let mut map = ObjectMap::new();
        map.set("nama", Value::from_string("Ada"));
        map.set("usia", Value::Number(36.0));
        assert_eq!(Value::new_object(map).to_output(), "{nama: Ada, usia: 36}");
    }

    #[test]
    fn cyclic_array_rendering_terminates() {
        let array = Value::new_array(Vec::new());
        if let Value::Array(elements) = &array {
            elements.borrow_mut().push(array.clone());
        }
        // Bounded by the depth cap rather than recursing forever.
        assert!(array.to_output().contains("..."));
    }
}
