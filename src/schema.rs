//! Declarative message types and the interpreter that parses and
//! serializes them.
//!
//! A [`TypeRegistry`] holds flat types, discriminated families and enums.
//! Types are described once with [`TypeSpec`] and [`FieldSpec`] values,
//! validated by [`TypeRegistryBuilder::build`], and are immutable after
//! that. Decoding produces a [`ParsedMessage`] holding only retained fields;
//! implicit fields and discriminators are recomputed on the way back out.
//!
//! ```
//! use plc_wire::schema::{FieldSpec, TypeRef, TypeRegistry, TypeSpec};
//! use plc_wire::{ReadBuffer, Value};
//!
//! let registry = TypeRegistry::builder()
//!     .add_type(
//!         TypeSpec::new("IoDataObject")
//!             .field(FieldSpec::simple("slotNumber", TypeRef::UInt(16)))
//!             .field(FieldSpec::simple("subSlotNumber", TypeRef::UInt(16)))
//!             .field(FieldSpec::simple("ioFrameOffset", TypeRef::UInt(16))),
//!     )
//!     .build()?;
//!
//! let bytes = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03];
//! let msg = registry.parse("IoDataObject", &mut ReadBuffer::new(&bytes), &[])?;
//! assert_eq!(msg.get("subSlotNumber"), Some(&Value::Int(2)));
//! assert_eq!(registry.to_bytes(&msg, &[])?, bytes);
//! # Ok::<(), plc_wire::CodecError>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::buffer::{ByteOrder, ReadBuffer, TextEncoding, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::expression::{Expr, Literal, Scope, VarRef, CAST_RESULT};
use crate::field;
use crate::value::{ParsedMessage, Value};

/// Built-in function names understood by the expression evaluator.
const FUNCTIONS: &[&str] = &["COUNT", "ARRAY_SIZE_IN_BYTES", "CEIL", "STR_LEN", "STATIC_CALL", CAST_RESULT];

const BUILTINS: &[&str] = &["curPos", "startPos", "_lastItem", "lengthInBits", "lengthInBytes"];

/// Semantic type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    /// Single bit, decoded as a bool.
    Bit,
    /// Unsigned integer of 1..=64 bits.
    UInt(u8),
    /// Two's complement integer of 1..=64 bits.
    Int(u8),
    /// IEEE-754 style float.
    Float {
        /// Exponent width.
        exponent: u8,
        /// Mantissa width.
        mantissa: u8,
    },
    /// Text whose length in bits is given by an expression.
    String {
        /// Length in bits.
        length: Expr,
        /// Text encoding.
        encoding: TextEncoding,
    },
    /// Member of a registered enum.
    Enum(String),
    /// Nested registered type, with argument expressions bound to its parameters.
    Complex {
        /// Registered type name.
        name: String,
        /// Arguments, evaluated in the enclosing type.
        args: Vec<Expr>,
    },
}

impl TypeRef {
    /// IEEE single precision.
    pub fn float32() -> Self {
        Self::Float { exponent: 8, mantissa: 23 }
    }

    /// IEEE double precision.
    pub fn float64() -> Self {
        Self::Float { exponent: 11, mantissa: 52 }
    }

    /// Variable length string, `length` being a bit-length expression.
    pub fn string(length: &str, encoding: TextEncoding) -> Result<Self> {
        Ok(Self::String {
            length: Expr::parse(length)?,
            encoding,
        })
    }

    /// Enum reference.
    pub fn enumeration(name: &str) -> Self {
        Self::Enum(name.to_string())
    }

    /// Nested type reference without arguments.
    pub fn complex(name: &str) -> Self {
        Self::Complex {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    /// Nested type reference with argument expressions.
    pub fn complex_with(name: &str, args: &[&str]) -> Result<Self> {
        Ok(Self::Complex {
            name: name.to_string(),
            args: args.iter().map(|a| Expr::parse(a)).collect::<Result<_>>()?,
        })
    }
}

/// Read-side stopping rule of an array field.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayLoop {
    /// Exactly this many elements.
    Count(Expr),
    /// Elements while fewer than this many bytes were consumed.
    Length(Expr),
    /// Elements until the condition holds for the element just read
    /// (bound as `_item`), or the buffer is exhausted.
    Terminated(Expr),
}

impl ArrayLoop {
    /// COUNT loop.
    pub fn count(expr: &str) -> Result<Self> {
        Ok(Self::Count(Expr::parse(expr)?))
    }

    /// LENGTH loop.
    pub fn length(expr: &str) -> Result<Self> {
        Ok(Self::Length(Expr::parse(expr)?))
    }

    /// TERMINATED loop.
    pub fn terminated(expr: &str) -> Result<Self> {
        Ok(Self::Terminated(Expr::parse(expr)?))
    }
}

/// Escape hatch for fields whose layout cannot be described declaratively.
pub trait ManualCodec: fmt::Debug + Send + Sync {
    /// Reads the field.
    fn parse(&self, rb: &mut ReadBuffer<'_>, scope: &dyn Scope) -> Result<Value>;

    /// Writes the field.
    fn serialize(&self, wb: &mut WriteBuffer, value: &Value, scope: &dyn Scope) -> Result<()>;
}

/// Vendor helper callable from expressions through `STATIC_CALL`.
pub type StaticFunction = Arc<dyn Fn(&TypeRegistry, &[Value]) -> Result<Value> + Send + Sync>;

/// What a field does on the wire.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Plain typed value, retained.
    Simple(TypeRef),
    /// Discriminator read into the parse context; derived from the case on write.
    Discriminator(TypeRef),
    /// Fixed value, tolerated when different on read.
    Reserved {
        /// Integer type.
        ty: TypeRef,
        /// Value always written.
        expected: u64,
    },
    /// Fixed value that must match on read.
    Const {
        /// Integer type.
        ty: TypeRef,
        /// Required value.
        expected: u64,
    },
    /// Read into the parse context; computed from `serialize` on write.
    Implicit {
        /// Integer type.
        ty: TypeRef,
        /// Value to write.
        serialize: Expr,
    },
    /// Checksum over earlier fields.
    Checksum {
        /// Integer type.
        ty: TypeRef,
        /// Computed checksum.
        checksum: Expr,
    },
    /// Repeated element.
    Array {
        /// Element type.
        ty: TypeRef,
        /// Read-side stopping rule.
        looping: ArrayLoop,
    },
    /// Value present only when the condition holds, or when data remains.
    Optional {
        /// Value type.
        ty: TypeRef,
        /// Presence condition.
        condition: Option<Expr>,
    },
    /// Fill items, skipped on read.
    Padding {
        /// Item type.
        ty: TypeRef,
        /// Fill value.
        value: Expr,
        /// Item count, or a condition for a single item.
        times: Expr,
    },
    /// Like const, with the expected value given by an expression.
    Assert {
        /// Value type.
        ty: TypeRef,
        /// Required value.
        expected: Expr,
    },
    /// No wire presence; available to later expressions.
    Virtual {
        /// Computed value.
        value: Expr,
    },
    /// Opaque strategy.
    Manual(Arc<dyn ManualCodec>),
}

/// One field of a type.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Kind and type.
    pub kind: FieldKind,
    /// Byte order override for this field.
    pub byte_order: Option<ByteOrder>,
}

impl FieldSpec {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            byte_order: None,
        }
    }

    /// Simple field.
    pub fn simple(name: &str, ty: TypeRef) -> Self {
        Self::new(name, FieldKind::Simple(ty))
    }

    /// Discriminator field.
    pub fn discriminator(name: &str, ty: TypeRef) -> Self {
        Self::new(name, FieldKind::Discriminator(ty))
    }

    /// Reserved field.
    pub fn reserved(ty: TypeRef, expected: u64) -> Self {
        Self::new("reserved", FieldKind::Reserved { ty, expected })
    }

    /// Const field.
    pub fn constant(name: &str, ty: TypeRef, expected: u64) -> Self {
        Self::new(name, FieldKind::Const { ty, expected })
    }

    /// Implicit field with its serialization expression.
    pub fn implicit(name: &str, ty: TypeRef, serialize: &str) -> Result<Self> {
        Ok(Self::new(
            name,
            FieldKind::Implicit {
                ty,
                serialize: Expr::parse(serialize)?,
            },
        ))
    }

    /// Checksum field.
    pub fn checksum(name: &str, ty: TypeRef, checksum: &str) -> Result<Self> {
        Ok(Self::new(
            name,
            FieldKind::Checksum {
                ty,
                checksum: Expr::parse(checksum)?,
            },
        ))
    }

    /// Array field.
    pub fn array(name: &str, ty: TypeRef, looping: ArrayLoop) -> Self {
        Self::new(name, FieldKind::Array { ty, looping })
    }

    /// Optional field.
    pub fn optional(name: &str, ty: TypeRef, condition: Option<&str>) -> Result<Self> {
        Ok(Self::new(
            name,
            FieldKind::Optional {
                ty,
                condition: condition.map(Expr::parse).transpose()?,
            },
        ))
    }

    /// Padding field.
    pub fn padding(ty: TypeRef, value: &str, times: &str) -> Result<Self> {
        Ok(Self::new(
            "pad",
            FieldKind::Padding {
                ty,
                value: Expr::parse(value)?,
                times: Expr::parse(times)?,
            },
        ))
    }

    /// Assert field.
    pub fn assert(name: &str, ty: TypeRef, expected: &str) -> Result<Self> {
        Ok(Self::new(
            name,
            FieldKind::Assert {
                ty,
                expected: Expr::parse(expected)?,
            },
        ))
    }

    /// Virtual field.
    pub fn virtual_field(name: &str, value: &str) -> Result<Self> {
        Ok(Self::new(
            name,
            FieldKind::Virtual {
                value: Expr::parse(value)?,
            },
        ))
    }

    /// Manual field.
    pub fn manual(name: &str, codec: Arc<dyn ManualCodec>) -> Self {
        Self::new(name, FieldKind::Manual(codec))
    }

    /// Overrides the byte order of this field.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }
}

/// Declared discriminator value of a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminatorValue {
    /// Numeric equality.
    Int(i128),
    /// Boolean equality.
    Bool(bool),
    /// Exact string equality.
    Str(String),
    /// Enum member identity, by symbol.
    Enum(String),
}

impl DiscriminatorValue {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Enum(symbol), Value::Enum { symbol: actual, .. }) => symbol == actual,
            (Self::Enum(_), _) => false,
            (Self::Str(s), Value::String(actual)) => s == actual,
            (Self::Str(_), _) => false,
            (Self::Bool(b), v) => v.as_bool().map_or(false, |actual| actual == *b),
            (Self::Int(i), v) => v.as_int().map_or(false, |actual| actual == *i),
        }
    }
}

impl fmt::Display for DiscriminatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Str(s) => write!(f, "'{}'", s),
            Self::Enum(s) => write!(f, "{}", s),
        }
    }
}

/// One concrete child of a discriminated family.
#[derive(Debug, Clone)]
pub struct CaseSpec {
    /// Concrete type name.
    pub name: String,
    /// One value per switch expression; `None` matches anything.
    pub discriminators: Vec<Option<DiscriminatorValue>>,
    /// Fields of the child.
    pub fields: Vec<FieldSpec>,
}

impl CaseSpec {
    /// Creates a case.
    pub fn new(name: &str, discriminators: Vec<Option<DiscriminatorValue>>) -> Self {
        Self {
            name: name.to_string(),
            discriminators,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    fn matches(&self, values: &[Value]) -> bool {
        self.discriminators
            .iter()
            .zip(values)
            .all(|(d, v)| d.as_ref().map_or(true, |d| d.matches(v)))
    }

    /// Whether some tuple selects both cases; a wildcard matches anything.
    fn overlaps(&self, other: &CaseSpec) -> bool {
        self.discriminators
            .iter()
            .zip(&other.discriminators)
            .all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }
}

/// Case selection of a discriminated family.
#[derive(Debug, Clone)]
pub struct SwitchSpec {
    /// Discriminator expressions, usually plain field or argument names.
    pub on: Vec<Expr>,
    /// Concrete children; the first match wins.
    pub cases: Vec<CaseSpec>,
}

impl SwitchSpec {
    /// Creates a switch over the given expressions.
    pub fn new(on: &[&str]) -> Result<Self> {
        Ok(Self {
            on: on.iter().map(|e| Expr::parse(e)).collect::<Result<_>>()?,
            cases: Vec::new(),
        })
    }

    /// Appends a case.
    pub fn case(mut self, case: CaseSpec) -> Self {
        self.cases.push(case);
        self
    }
}

/// A flat type or a discriminated family.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    /// Type name.
    pub name: String,
    /// Parameter names, bound positionally from [`TypeRef::Complex`] arguments.
    pub params: Vec<String>,
    /// Shared leading fields.
    pub fields: Vec<FieldSpec>,
    /// Case selection, for families.
    pub switch: Option<SwitchSpec>,
    /// Shared fields following the case fields.
    pub trailing: Vec<FieldSpec>,
    /// Default byte order of the type's fields.
    pub byte_order: Option<ByteOrder>,
}

impl TypeSpec {
    /// Creates an empty type.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            fields: Vec::new(),
            switch: None,
            trailing: Vec::new(),
            byte_order: None,
        }
    }

    /// Declares parameters.
    pub fn params(mut self, params: &[&str]) -> Self {
        self.params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Appends a shared field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Makes the type a discriminated family.
    pub fn switch(mut self, switch: SwitchSpec) -> Self {
        self.switch = Some(switch);
        self
    }

    /// Appends a field after the case fields.
    pub fn trailing(mut self, field: FieldSpec) -> Self {
        self.trailing.push(field);
        self
    }

    /// Sets the default byte order.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    fn all_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .chain(self.switch.iter().flat_map(|s| s.cases.iter().flat_map(|c| c.fields.iter())))
            .chain(self.trailing.iter())
    }

    fn declares(&self, name: &str) -> bool {
        self.all_fields().any(|f| f.name == name)
    }
}

/// One member of an enum.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    /// Symbol.
    pub symbol: String,
    /// Wire value.
    pub value: u64,
    /// Constant properties, readable as `member.property`.
    pub properties: Vec<(String, Value)>,
}

/// An enum with value↔symbol lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumSpec {
    /// Enum name.
    pub name: String,
    /// Wire width.
    pub bits: u8,
    /// Members.
    pub members: Vec<EnumMember>,
}

impl EnumSpec {
    /// Creates an empty enum.
    pub fn new(name: &str, bits: u8) -> Self {
        Self {
            name: name.to_string(),
            bits,
            members: Vec::new(),
        }
    }

    /// Adds a member.
    pub fn member(self, symbol: &str, value: u64) -> Self {
        self.member_with(symbol, value, Vec::new())
    }

    /// Adds a member with properties.
    pub fn member_with(mut self, symbol: &str, value: u64, properties: Vec<(&str, Value)>) -> Self {
        self.members.push(EnumMember {
            symbol: symbol.to_string(),
            value,
            properties: properties.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        });
        self
    }

    /// Member with the given wire value.
    pub fn by_value(&self, value: u64) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.value == value)
    }

    /// Member with the given symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.symbol == symbol)
    }

    fn value_of(&self, member: &EnumMember) -> Value {
        Value::Enum {
            type_name: self.name.clone(),
            symbol: member.symbol.clone(),
            value: i128::from(member.value),
        }
    }
}

/// Collects and validates type definitions.
#[derive(Default)]
pub struct TypeRegistryBuilder {
    types: Vec<TypeSpec>,
    enums: Vec<EnumSpec>,
    statics: Vec<(String, StaticFunction)>,
}

impl TypeRegistryBuilder {
    /// Adds a type.
    pub fn add_type(mut self, spec: TypeSpec) -> Self {
        self.types.push(spec);
        self
    }

    /// Adds an enum.
    pub fn add_enum(mut self, spec: EnumSpec) -> Self {
        self.enums.push(spec);
        self
    }

    /// Registers a `STATIC_CALL` helper.
    pub fn add_static(
        mut self,
        name: &str,
        function: impl Fn(&TypeRegistry, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.statics.push((name.to_string(), Arc::new(function)));
        self
    }

    /// Validates all definitions and freezes them.
    pub fn build(self) -> Result<TypeRegistry> {
        let mut types = HashMap::new();
        for spec in self.types {
            let name = spec.name.clone();
            if types.insert(name.clone(), spec).is_some() {
                return Err(definition_error(&name, "type is defined twice"));
            }
        }
        let mut enums = HashMap::new();
        for spec in self.enums {
            validate_enum(&spec)?;
            let name = spec.name.clone();
            if types.contains_key(&name) || enums.insert(name.clone(), spec).is_some() {
                return Err(definition_error(&name, "name is defined twice"));
            }
        }
        let statics = self.statics.into_iter().collect();
        let registry = TypeRegistry { types, enums, statics };
        for spec in registry.types.values() {
            registry.validate_type(spec)?;
        }
        log::debug!(
            "Type registry built with {} types and {} enums",
            registry.types.len(),
            registry.enums.len()
        );
        Ok(registry)
    }
}

fn definition_error(name: &str, reason: impl Into<String>) -> CodecError {
    CodecError::invalid_parameter(name, reason)
}

fn expression_error(name: &str, reason: impl std::fmt::Display) -> CodecError {
    CodecError::invalid_expression(format!("{}: {}", name, reason))
}

fn validate_enum(spec: &EnumSpec) -> Result<()> {
    if spec.bits == 0 || spec.bits > 64 {
        return Err(definition_error(&spec.name, format!("invalid width {}", spec.bits)));
    }
    let mut values = HashSet::new();
    let mut symbols = HashSet::new();
    for member in &spec.members {
        if !values.insert(member.value) {
            return Err(definition_error(&spec.name, format!("duplicate value {}", member.value)));
        }
        if !symbols.insert(member.symbol.as_str()) {
            return Err(definition_error(&spec.name, format!("duplicate symbol {}", member.symbol)));
        }
        if spec.bits < 64 && member.value >> spec.bits != 0 {
            return Err(definition_error(
                &spec.name,
                format!("{} does not fit in {} bits", member.symbol, spec.bits),
            ));
        }
    }
    Ok(())
}

/// Immutable set of validated types.
pub struct TypeRegistry {
    types: HashMap<String, TypeSpec>,
    enums: HashMap<String, EnumSpec>,
    statics: HashMap<String, StaticFunction>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        let mut enums: Vec<_> = self.enums.keys().collect();
        enums.sort();
        f.debug_struct("TypeRegistry")
            .field("types", &types)
            .field("enums", &enums)
            .field("statics", &self.statics.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    /// Dry run into a scratch buffer; implicit and checksum fields write zeros.
    Measure,
}

impl TypeRegistry {
    /// Starts a new definition set.
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Registered type by name.
    pub fn type_spec(&self, name: &str) -> Result<&TypeSpec> {
        self.types
            .get(name)
            .ok_or_else(|| CodecError::invalid_parameter("type", format!("unknown type '{}'", name)))
    }

    /// Registered enum by name.
    pub fn enum_spec(&self, name: &str) -> Result<&EnumSpec> {
        self.enums
            .get(name)
            .ok_or_else(|| CodecError::invalid_parameter("enum", format!("unknown enum '{}'", name)))
    }

    /// Enum member as a value.
    pub fn enum_value(&self, type_name: &str, symbol: &str) -> Option<Value> {
        let spec = self.enums.get(type_name)?;
        spec.by_symbol(symbol).map(|m| spec.value_of(m))
    }

    /// Parses one instance of `type_name`. Arguments are matched to the
    /// type's parameters by name.
    pub fn parse(&self, type_name: &str, rb: &mut ReadBuffer<'_>, args: &[(&str, Value)]) -> Result<ParsedMessage> {
        let spec = self.type_spec(type_name)?;
        let args = bind_named(spec, args)?;
        self.parse_type(spec, rb, args, None)
    }

    /// Parses a whole byte slice.
    pub fn from_bytes(&self, type_name: &str, bytes: &[u8], args: &[(&str, Value)]) -> Result<ParsedMessage> {
        self.parse(type_name, &mut ReadBuffer::new(bytes), args)
    }

    /// Serializes an instance, with the same arguments it was parsed with.
    pub fn serialize(&self, msg: &ParsedMessage, wb: &mut WriteBuffer, args: &[(&str, Value)]) -> Result<()> {
        let spec = self.type_spec(msg.type_name())?;
        let args = bind_named(spec, args)?;
        self.serialize_type(spec, msg, wb, args, None, Mode::Write)
    }

    /// Serializes an instance into a new byte vector.
    pub fn to_bytes(&self, msg: &ParsedMessage, args: &[(&str, Value)]) -> Result<Vec<u8>> {
        let mut wb = WriteBuffer::new();
        self.serialize(msg, &mut wb, args)?;
        Ok(wb.into_bytes())
    }

    /// Number of bits [`serialize`](Self::serialize) writes for this instance.
    pub fn length_in_bits(&self, msg: &ParsedMessage, args: &[(&str, Value)]) -> Result<u64> {
        let spec = self.type_spec(msg.type_name())?;
        let args = bind_named(spec, args)?;
        self.measure(spec, msg, args, None)
    }

    fn measure(&self, spec: &TypeSpec, msg: &ParsedMessage, args: Vec<(String, Value)>, last_item: Option<bool>) -> Result<u64> {
        let mut scratch = WriteBuffer::new();
        self.serialize_type(spec, msg, &mut scratch, args, last_item, Mode::Measure)?;
        Ok(scratch.position())
    }

    /// Length of a nested instance reached through an expression; parameters
    /// that cannot be known there are bound to null.
    fn measure_nested(&self, msg: &ParsedMessage) -> Result<u64> {
        let spec = self.type_spec(msg.type_name())?;
        let args = spec.params.iter().map(|p| (p.clone(), Value::Null)).collect();
        self.measure(spec, msg, args, None)
    }

    fn call_static(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self
            .statics
            .get(name)
            .ok_or_else(|| CodecError::invalid_expression(format!("unknown static function '{}'", name)))?;
        function(self, args)
    }

    /// Discriminator of an instance, derived from its case.
    fn discriminator_of(&self, msg: &ParsedMessage, name: &str) -> Option<Value> {
        let spec = self.types.get(msg.type_name())?;
        let switch = spec.switch.as_ref()?;
        let case = switch.cases.iter().find(|c| Some(c.name.as_str()) == msg.case_name())?;
        let index = switch.on.iter().position(|e| e.as_plain_var() == Some(name))?;
        let value = case.discriminators.get(index)?.as_ref()?;
        Some(self.discriminator_value(spec, name, value))
    }

    fn discriminator_value(&self, spec: &TypeSpec, name: &str, value: &DiscriminatorValue) -> Value {
        match value {
            DiscriminatorValue::Int(v) => Value::Int(*v),
            DiscriminatorValue::Bool(b) => Value::Bool(*b),
            DiscriminatorValue::Str(s) => Value::String(s.clone()),
            DiscriminatorValue::Enum(symbol) => spec
                .fields
                .iter()
                .find_map(|f| match &f.kind {
                    FieldKind::Discriminator(TypeRef::Enum(e)) if f.name == name => self.enum_value(e, symbol),
                    _ => None,
                })
                .unwrap_or_else(|| Value::String(symbol.clone())),
        }
    }

    fn width_of(&self, ty: &TypeRef, field: &str) -> Result<u8> {
        match ty {
            TypeRef::Bit => Ok(1),
            TypeRef::UInt(bits) | TypeRef::Int(bits) => Ok(*bits),
            TypeRef::Float { exponent, mantissa } => Ok(1 + exponent + mantissa),
            TypeRef::Enum(name) => Ok(self.enum_spec(name)?.bits),
            _ => Err(definition_error(field, "field needs a fixed-width type")),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate_type(&self, spec: &TypeSpec) -> Result<()> {
        for field in spec.all_fields() {
            self.validate_field(spec, field)?;
        }
        let Some(switch) = &spec.switch else {
            return Ok(());
        };
        if switch.on.is_empty() || switch.cases.is_empty() {
            return Err(definition_error(&spec.name, "switch needs discriminators and cases"));
        }
        for expr in &switch.on {
            self.validate_expr(spec, &spec.name, expr, false)?;
        }
        let mut names = HashSet::new();
        for (i, case) in switch.cases.iter().enumerate() {
            if !names.insert(case.name.as_str()) {
                return Err(definition_error(&spec.name, format!("case '{}' is defined twice", case.name)));
            }
            if case.discriminators.len() != switch.on.len() {
                return Err(definition_error(
                    &case.name,
                    format!(
                        "declares {} discriminator values, switch has {}",
                        case.discriminators.len(),
                        switch.on.len()
                    ),
                ));
            }
            if let Some(other) = switch.cases[..i].iter().find(|c| c.overlaps(case)) {
                return Err(definition_error(
                    &spec.name,
                    format!("cases '{}' and '{}' both match some discriminator tuple", other.name, case.name),
                ));
            }
            for (expr, value) in switch.on.iter().zip(&case.discriminators) {
                if let (Some(name), Some(DiscriminatorValue::Enum(symbol))) = (expr.as_plain_var(), value) {
                    self.validate_enum_symbol(spec, name, symbol)?;
                }
            }
        }
        Ok(())
    }

    fn validate_enum_symbol(&self, spec: &TypeSpec, name: &str, symbol: &str) -> Result<()> {
        for field in &spec.fields {
            if let FieldKind::Discriminator(TypeRef::Enum(e)) = &field.kind {
                if field.name == name && self.enum_value(e, symbol).is_none() {
                    return Err(definition_error(&spec.name, format!("'{}' is not a member of {}", symbol, e)));
                }
            }
        }
        Ok(())
    }

    fn validate_field(&self, spec: &TypeSpec, field: &FieldSpec) -> Result<()> {
        let name = format!("{}.{}", spec.name, field.name);
        match &field.kind {
            FieldKind::Simple(ty) | FieldKind::Discriminator(ty) | FieldKind::Optional { ty, condition: None } => {
                self.validate_type_ref(spec, &name, ty)
            }
            FieldKind::Reserved { ty, expected } | FieldKind::Const { ty, expected } => {
                let bits = self.width_of(ty, &name)?;
                if bits < 64 && expected >> bits != 0 {
                    return Err(definition_error(&name, format!("0x{:X} does not fit in {} bits", expected, bits)));
                }
                Ok(())
            }
            FieldKind::Implicit { ty, serialize: expr } | FieldKind::Checksum { ty, checksum: expr } => {
                self.width_of(ty, &name)?;
                self.validate_expr(spec, &name, expr, false)
            }
            FieldKind::Array { ty, looping } => {
                self.validate_type_ref(spec, &name, ty)?;
                match looping {
                    ArrayLoop::Count(e) | ArrayLoop::Length(e) => self.validate_expr(spec, &name, e, false),
                    ArrayLoop::Terminated(e) => self.validate_expr(spec, &name, e, true),
                }
            }
            FieldKind::Optional {
                ty,
                condition: Some(condition),
            } => {
                self.validate_type_ref(spec, &name, ty)?;
                self.validate_expr(spec, &name, condition, false)
            }
            FieldKind::Padding { ty, value, times } => {
                self.width_of(ty, &name)?;
                self.validate_expr(spec, &name, value, false)?;
                self.validate_expr(spec, &name, times, false)
            }
            FieldKind::Assert { ty, expected } => {
                self.validate_type_ref(spec, &name, ty)?;
                self.validate_expr(spec, &name, expected, false)
            }
            FieldKind::Virtual { value } => self.validate_expr(spec, &name, value, false),
            FieldKind::Manual(_) => Ok(()),
        }
    }

    fn validate_type_ref(&self, spec: &TypeSpec, name: &str, ty: &TypeRef) -> Result<()> {
        match ty {
            TypeRef::Bit => Ok(()),
            TypeRef::UInt(bits) | TypeRef::Int(bits) if (1..=64).contains(bits) => Ok(()),
            TypeRef::UInt(bits) | TypeRef::Int(bits) => Err(definition_error(name, format!("invalid width {}", bits))),
            TypeRef::Float { exponent, mantissa } => {
                if 1 + u32::from(*exponent) + u32::from(*mantissa) > 64 {
                    return Err(definition_error(name, "float wider than 64 bits"));
                }
                Ok(())
            }
            TypeRef::String { length, .. } => self.validate_expr(spec, name, length, false),
            TypeRef::Enum(e) => self.enum_spec(e).map(|_| ()),
            TypeRef::Complex { name: type_name, args } => {
                let target = self.type_spec(type_name)?;
                if target.params.len() != args.len() {
                    return Err(definition_error(
                        name,
                        format!("{} takes {} argument(s), got {}", type_name, target.params.len(), args.len()),
                    ));
                }
                args.iter().try_for_each(|a| self.validate_expr(spec, name, a, false))
            }
        }
    }

    /// Checks that every name `expr` uses resolves in an instance of `spec`;
    /// `item` is set inside TERMINATED loop conditions, where `_item` is bound.
    fn validate_expr(&self, spec: &TypeSpec, name: &str, expr: &Expr, item: bool) -> Result<()> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Var(var) => self.validate_var(spec, name, var, item),
            Expr::Unary { operand, .. } => self.validate_expr(spec, name, operand, item),
            Expr::Binary { lhs, rhs, .. } => {
                self.validate_expr(spec, name, lhs, item)?;
                self.validate_expr(spec, name, rhs, item)
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.validate_expr(spec, name, condition, item)?;
                self.validate_expr(spec, name, then, item)?;
                self.validate_expr(spec, name, otherwise, item)
            }
        }
    }

    fn validate_var(&self, spec: &TypeSpec, name: &str, var: &VarRef, item: bool) -> Result<()> {
        if let Some(args) = &var.args {
            if !FUNCTIONS.contains(&var.name.as_str()) {
                return Err(expression_error(name, format!("unknown function '{}'", var.name)));
            }
            let mut args = args.as_slice();
            if var.name == "STATIC_CALL" {
                let function = match args.first() {
                    Some(Expr::Literal(Literal::Str(function))) => Some(function.as_str()),
                    Some(other) => other.as_plain_var(),
                    None => None,
                };
                match function {
                    Some(function) if self.statics.contains_key(function) => args = &args[1..],
                    Some(function) => {
                        return Err(expression_error(name, format!("unknown static function '{}'", function)));
                    }
                    None => return Err(expression_error(name, "STATIC_CALL() needs a function name")),
                }
            }
            args.iter().try_for_each(|a| self.validate_expr(spec, name, a, item))?;
        } else if !self.resolves(spec, var, item) {
            return Err(expression_error(name, format!("unknown variable '{}'", var.name)));
        }
        if let Some(index) = &var.index {
            self.validate_expr(spec, name, index, item)?;
        }
        // links after the first are properties of whatever the root evaluates to
        let mut link = var.child.as_deref();
        while let Some(child) = link {
            if let Some(index) = &child.index {
                self.validate_expr(spec, name, index, item)?;
            }
            link = child.child.as_deref();
        }
        Ok(())
    }

    /// Whether the root name of a reference is known to an instance of `spec`.
    fn resolves(&self, spec: &TypeSpec, var: &VarRef, item: bool) -> bool {
        let root = var.name.as_str();
        BUILTINS.contains(&root)
            || (item && root == "_item")
            || spec.declares(root)
            || spec.params.iter().any(|p| p == root)
            || (var.child.is_some() && self.enums.contains_key(root))
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    fn parse_type(
        &self,
        spec: &TypeSpec,
        rb: &mut ReadBuffer<'_>,
        args: Vec<(String, Value)>,
        last_item: Option<bool>,
    ) -> Result<ParsedMessage> {
        rb.push_context(&spec.name);
        let order = spec.byte_order.unwrap_or_else(|| rb.byte_order());
        let mut ctx = Context::new(self, spec, None, args, rb.position(), last_item, None);
        for field in &spec.fields {
            self.parse_field(field, rb, &mut ctx, order)?;
        }
        let mut case_name = None;
        if let Some(switch) = &spec.switch {
            ctx.cur_pos = rb.position();
            let values = switch.on.iter().map(|e| e.evaluate(&ctx)).collect::<Result<Vec<_>>>()?;
            let case = switch
                .cases
                .iter()
                .find(|c| c.matches(&values))
                .ok_or_else(|| CodecError::unsupported_discriminator(&spec.name, render_tuple(&values), ctx.cur_pos))?;
            log::debug!("{} selected {} for {}", spec.name, case.name, render_tuple(&values));
            for field in &case.fields {
                self.parse_field(field, rb, &mut ctx, order)?;
            }
            case_name = Some(case.name.clone());
        }
        for field in &spec.trailing {
            self.parse_field(field, rb, &mut ctx, order)?;
        }
        rb.pop_context();
        Ok(match case_name {
            Some(case) => ParsedMessage::with_case(&spec.name, case, ctx.fields),
            None => ParsedMessage::new(&spec.name, ctx.fields),
        })
    }

    fn parse_field(&self, field: &FieldSpec, rb: &mut ReadBuffer<'_>, ctx: &mut Context<'_>, order: ByteOrder) -> Result<()> {
        let order = field.byte_order.unwrap_or(order);
        let name = field.name.as_str();
        ctx.cur_pos = rb.position();
        match &field.kind {
            FieldKind::Simple(ty) => {
                let value = self.read_value(ty, name, rb, ctx, order, None)?;
                ctx.fields.push((name.to_string(), value));
            }
            FieldKind::Discriminator(ty) | FieldKind::Implicit { ty, .. } => {
                let value = self.read_value(ty, name, rb, ctx, order, None)?;
                ctx.transient.push((name.to_string(), value));
            }
            FieldKind::Reserved { ty, expected } => {
                field::read_reserved(rb, name, self.width_of(ty, name)?, *expected)?;
            }
            FieldKind::Const { ty, expected } => {
                field::read_const_ordered(rb, name, self.width_of(ty, name)?, *expected, order)?;
            }
            FieldKind::Assert { ty, expected } => {
                let position = rb.position();
                let actual = self.read_value(ty, name, rb, ctx, order, None)?;
                let wanted = expected.evaluate(&*ctx)?;
                if actual.as_int()? != wanted.as_int()? {
                    return Err(CodecError::ConstValueMismatch {
                        field: name.to_string(),
                        position,
                        expected: wanted.as_int()? as u64,
                        actual: actual.as_int()? as u64,
                    });
                }
                ctx.transient.push((name.to_string(), actual));
            }
            FieldKind::Checksum { ty, checksum } => {
                let computed = checksum.evaluate(&*ctx)?.as_u64()?;
                let actual = field::read_checksum(rb, name, self.width_of(ty, name)?, order, computed)?;
                ctx.transient.push((name.to_string(), Value::from(actual)));
            }
            FieldKind::Array { ty, looping } => {
                let items = self.read_array(ty, looping, name, rb, ctx, order)?;
                ctx.fields.push((name.to_string(), Value::List(items)));
            }
            FieldKind::Optional { ty, condition } => {
                let present = match condition {
                    Some(condition) => condition.evaluate(&*ctx)?.as_bool()?,
                    None => rb.remaining_bits() > 0,
                };
                let value = if present {
                    self.read_value(ty, name, rb, ctx, order, None)?
                } else {
                    Value::Null
                };
                ctx.fields.push((name.to_string(), value));
            }
            FieldKind::Padding { ty, times, .. } => {
                let count = padding_count(&times.evaluate(&*ctx)?)?;
                field::read_padding(rb, name, self.width_of(ty, name)?, count)?;
            }
            FieldKind::Virtual { value } => {
                let value = value.evaluate(&*ctx)?;
                ctx.transient.push((name.to_string(), value));
            }
            FieldKind::Manual(codec) => {
                let value = codec.parse(rb, &*ctx)?;
                ctx.fields.push((name.to_string(), value));
            }
        }
        Ok(())
    }

    fn read_array(
        &self,
        ty: &TypeRef,
        looping: &ArrayLoop,
        name: &str,
        rb: &mut ReadBuffer<'_>,
        ctx: &Context<'_>,
        order: ByteOrder,
    ) -> Result<Vec<Value>> {
        match looping {
            ArrayLoop::Count(count) => {
                let count = usize::try_from(count.evaluate(ctx)?.as_u64()?)
                    .map_err(|_| CodecError::invalid_frame_at(name, rb.position(), "element count is too large"))?;
                field::read_count_array(rb, name, count, |rb, last| {
                    self.read_value(ty, name, rb, ctx, order, Some(last))
                })
            }
            ArrayLoop::Length(length) => {
                let length = usize::try_from(length.evaluate(ctx)?.as_u64()?)
                    .map_err(|_| CodecError::invalid_frame_at(name, rb.position(), "byte length is too large"))?;
                field::read_length_array(rb, name, length, |rb| self.read_value(ty, name, rb, ctx, order, None))
            }
            ArrayLoop::Terminated(condition) => {
                rb.push_context(name);
                let mut items = Vec::new();
                while rb.remaining_bits() > 0 {
                    let item = self.read_value(ty, name, rb, ctx, order, None)?;
                    let done = condition.evaluate(&ItemScope { parent: ctx, item: &item })?.as_bool()?;
                    items.push(item);
                    if done {
                        break;
                    }
                }
                rb.pop_context();
                Ok(items)
            }
        }
    }

    fn read_value(
        &self,
        ty: &TypeRef,
        name: &str,
        rb: &mut ReadBuffer<'_>,
        ctx: &Context<'_>,
        order: ByteOrder,
        last_item: Option<bool>,
    ) -> Result<Value> {
        match ty {
            TypeRef::Bit => Ok(Value::Bool(rb.read_bit(name)?)),
            TypeRef::UInt(bits) => Ok(Value::from(rb.read_unsigned_ordered(name, *bits, order)?)),
            TypeRef::Int(bits) => Ok(Value::from(rb.read_signed_ordered(name, *bits, order)?)),
            TypeRef::Float { exponent, mantissa } => Ok(Value::Float(rb.read_float(name, *exponent, *mantissa)?)),
            TypeRef::String { length, encoding } => {
                let bits = length.evaluate(ctx)?.as_u64()?;
                Ok(Value::String(rb.read_string(name, bits, *encoding)?))
            }
            TypeRef::Enum(enum_name) => {
                let spec = self.enum_spec(enum_name)?;
                let position = rb.position();
                let raw = rb.read_unsigned_ordered(name, spec.bits, order)?;
                spec.by_value(raw)
                    .map(|m| spec.value_of(m))
                    .ok_or_else(|| CodecError::unknown_enum_value(enum_name, name, position, raw))
            }
            TypeRef::Complex { name: type_name, args } => {
                let spec = self.type_spec(type_name)?;
                let values = args.iter().map(|a| a.evaluate(ctx)).collect::<Result<Vec<_>>>()?;
                let args = bind_positional(spec, values)?;
                Ok(Value::from(self.parse_type(spec, rb, args, last_item)?))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    fn serialize_type(
        &self,
        spec: &TypeSpec,
        msg: &ParsedMessage,
        wb: &mut WriteBuffer,
        args: Vec<(String, Value)>,
        last_item: Option<bool>,
        mode: Mode,
    ) -> Result<()> {
        if msg.type_name() != spec.name {
            return Err(CodecError::encoding(
                &spec.name,
                format!("expected a {} instance, got {}", spec.name, msg.type_name()),
            ));
        }
        let case = match (&spec.switch, msg.case_name()) {
            (Some(switch), Some(case_name)) => Some(
                switch
                    .cases
                    .iter()
                    .find(|c| c.name == case_name)
                    .ok_or_else(|| CodecError::unsupported_discriminator(&spec.name, case_name, wb.position()))?,
            ),
            (Some(_), None) => return Err(CodecError::encoding(&spec.name, "instance has no concrete case")),
            (None, _) => None,
        };
        wb.push_context(&spec.name);
        let order = spec.byte_order.unwrap_or(wb.options().byte_order);
        let mut ctx = Context::new(self, spec, Some(msg), args, wb.position(), last_item, Some(mode));
        if let (Some(switch), Some(case)) = (&spec.switch, case) {
            for (expr, value) in switch.on.iter().zip(&case.discriminators) {
                if let (Some(name), Some(value)) = (expr.as_plain_var(), value) {
                    let value = self.discriminator_value(spec, name, value);
                    ctx.transient.push((name.to_string(), value));
                }
            }
        }
        let case_fields = case.map(|c| c.fields.as_slice()).unwrap_or_default();
        for field in spec.fields.iter().chain(case_fields).chain(&spec.trailing) {
            self.write_field(field, msg, wb, &mut ctx, order)?;
        }
        wb.pop_context();
        Ok(())
    }

    fn write_field(
        &self,
        field: &FieldSpec,
        msg: &ParsedMessage,
        wb: &mut WriteBuffer,
        ctx: &mut Context<'_>,
        order: ByteOrder,
    ) -> Result<()> {
        let order = field.byte_order.unwrap_or(order);
        let name = field.name.as_str();
        let measuring = ctx.mode == Some(Mode::Measure);
        ctx.cur_pos = wb.position();
        match &field.kind {
            FieldKind::Simple(ty) => {
                self.write_value(ty, name, msg.require(name)?, wb, ctx, order, None)?;
            }
            FieldKind::Discriminator(ty) => {
                let value = ctx
                    .transient_value(name)
                    .ok_or_else(|| CodecError::encoding(name, "discriminator cannot be derived from the instance case"))?;
                self.write_value(ty, name, &value, wb, ctx, order, None)?;
            }
            FieldKind::Implicit { ty, serialize: expr } | FieldKind::Checksum { ty, checksum: expr } => {
                if measuring {
                    // only the width matters; an expression over the length being measured has no value yet
                    let value = if uses_own_length(expr) {
                        log::trace!("{}.{} left unset while measuring", ctx.spec.name, name);
                        Value::Null
                    } else {
                        expr.evaluate(&*ctx)?
                    };
                    wb.write_unsigned(name, self.width_of(ty, name)?, 0)?;
                    ctx.transient.push((name.to_string(), value));
                } else {
                    let value = expr.evaluate(&*ctx)?;
                    self.write_value(ty, name, &value, wb, ctx, order, None)?;
                    ctx.transient.push((name.to_string(), value));
                }
            }
            FieldKind::Reserved { ty, expected } => {
                field::write_reserved(wb, name, self.width_of(ty, name)?, *expected)?;
            }
            FieldKind::Const { ty, expected } => {
                field::write_const_ordered(wb, name, self.width_of(ty, name)?, *expected, order)?;
            }
            FieldKind::Assert { ty, expected } => {
                let value = expected.evaluate(&*ctx)?;
                self.write_value(ty, name, &value, wb, ctx, order, None)?;
            }
            FieldKind::Array { ty, .. } => {
                let items = msg.require(name)?.as_list()?;
                wb.push_context(name);
                for (i, item) in items.iter().enumerate() {
                    self.write_value(ty, name, item, wb, ctx, order, Some(i + 1 == items.len()))?;
                }
                wb.pop_context();
            }
            FieldKind::Optional { ty, .. } => {
                if let Some(value) = msg.get(name).filter(|v| !v.is_null()) {
                    self.write_value(ty, name, value, wb, ctx, order, None)?;
                }
            }
            FieldKind::Padding { ty, value, times } => {
                let count = padding_count(&times.evaluate(&*ctx)?)?;
                let fill = value.evaluate(&*ctx)?.as_u64()?;
                field::write_padding(wb, name, self.width_of(ty, name)?, fill, count)?;
            }
            FieldKind::Virtual { value } => {
                let value = value.evaluate(&*ctx)?;
                ctx.transient.push((name.to_string(), value));
            }
            FieldKind::Manual(codec) => {
                codec.serialize(wb, msg.require(name)?, &*ctx)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_value(
        &self,
        ty: &TypeRef,
        name: &str,
        value: &Value,
        wb: &mut WriteBuffer,
        ctx: &Context<'_>,
        order: ByteOrder,
        last_item: Option<bool>,
    ) -> Result<()> {
        let invalid = |e: CodecError| CodecError::encoding(name, e.to_string());
        match ty {
            TypeRef::Bit => wb.write_bit(name, value.as_bool().map_err(invalid)?),
            TypeRef::UInt(bits) => wb.write_unsigned_ordered(name, *bits, value.as_u64().map_err(invalid)?, order),
            TypeRef::Int(bits) => {
                let v = i64::try_from(value.as_int().map_err(invalid)?)
                    .map_err(|_| CodecError::encoding(name, format!("{} does not fit in 64 bits", value)))?;
                wb.write_signed_ordered(name, *bits, v, order)
            }
            TypeRef::Float { exponent, mantissa } => {
                wb.write_float(name, *exponent, *mantissa, value.as_float().map_err(invalid)?)
            }
            TypeRef::String { length, encoding } => {
                let bits = length.evaluate(ctx)?.as_u64()?;
                wb.write_string(name, bits, *encoding, value.as_str().map_err(invalid)?)
            }
            TypeRef::Enum(enum_name) => {
                let spec = self.enum_spec(enum_name)?;
                let raw = match value {
                    Value::Enum { symbol, .. } => spec
                        .by_symbol(symbol)
                        .map(|m| m.value)
                        .ok_or_else(|| CodecError::encoding(name, format!("'{}' is not a member of {}", symbol, enum_name)))?,
                    other => other.as_u64().map_err(invalid)?,
                };
                wb.write_unsigned_ordered(name, spec.bits, raw, order)
            }
            TypeRef::Complex { name: type_name, args } => {
                let msg = value.as_message().map_err(invalid)?;
                let spec = self.type_spec(type_name)?;
                let values = args.iter().map(|a| a.evaluate(ctx)).collect::<Result<Vec<_>>>()?;
                let args = bind_positional(spec, values)?;
                self.serialize_type(spec, msg, wb, args, last_item, ctx.mode.unwrap_or(Mode::Write))
            }
        }
    }
}

fn bind_named(spec: &TypeSpec, args: &[(&str, Value)]) -> Result<Vec<(String, Value)>> {
    spec.params
        .iter()
        .map(|param| {
            args.iter()
                .find(|(name, _)| *name == param.as_str())
                .map(|(_, value)| (param.clone(), value.clone()))
                .ok_or_else(|| CodecError::invalid_parameter(param, format!("{} needs argument '{}'", spec.name, param)))
        })
        .collect()
}

fn bind_positional(spec: &TypeSpec, values: Vec<Value>) -> Result<Vec<(String, Value)>> {
    if values.len() != spec.params.len() {
        return Err(CodecError::invalid_parameter(
            &spec.name,
            format!("takes {} argument(s), got {}", spec.params.len(), values.len()),
        ));
    }
    Ok(spec.params.iter().cloned().zip(values).collect())
}

fn padding_count(value: &Value) -> Result<usize> {
    match value {
        Value::Bool(b) => Ok(usize::from(*b)),
        other => usize::try_from(other.as_u64()?)
            .map_err(|_| CodecError::invalid_expression(format!("padding count {} is too large", other))),
    }
}

/// Whether `expr` reads `lengthInBits` or `lengthInBytes` of the instance it belongs to.
fn uses_own_length(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) => false,
        Expr::Var(var) => {
            matches!(var.name.as_str(), "lengthInBits" | "lengthInBytes")
                || var.args.iter().flatten().any(uses_own_length)
                || var.index.as_deref().is_some_and(uses_own_length)
        }
        Expr::Unary { operand, .. } => uses_own_length(operand),
        Expr::Binary { lhs, rhs, .. } => uses_own_length(lhs) || uses_own_length(rhs),
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => uses_own_length(condition) || uses_own_length(then) || uses_own_length(otherwise),
    }
}

fn render_tuple(values: &[Value]) -> String {
    match values {
        [single] => single.to_string(),
        many => format!(
            "({})",
            many.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Parse or serialize context of one type instance.
struct Context<'a> {
    registry: &'a TypeRegistry,
    spec: &'a TypeSpec,
    /// Instance being written; `None` while parsing.
    message: Option<&'a ParsedMessage>,
    args: Vec<(String, Value)>,
    /// Retained values read so far.
    fields: Vec<(String, Value)>,
    /// Implicit, discriminator and virtual values.
    transient: Vec<(String, Value)>,
    start_pos: u64,
    cur_pos: u64,
    last_item: Option<bool>,
    mode: Option<Mode>,
}

impl<'a> Context<'a> {
    fn new(
        registry: &'a TypeRegistry,
        spec: &'a TypeSpec,
        message: Option<&'a ParsedMessage>,
        args: Vec<(String, Value)>,
        start_pos: u64,
        last_item: Option<bool>,
        mode: Option<Mode>,
    ) -> Self {
        Self {
            registry,
            spec,
            message,
            args,
            fields: Vec::new(),
            transient: Vec::new(),
            start_pos,
            cur_pos: start_pos,
            last_item,
            mode,
        }
    }

    fn transient_value(&self, name: &str) -> Option<Value> {
        self.transient.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }
}

impl Scope for Context<'_> {
    fn builtin(&self, name: &str) -> Result<Option<Value>> {
        match name {
            "curPos" => Ok(Some(Value::from((self.cur_pos - self.start_pos) / 8))),
            "startPos" => Ok(Some(Value::from(self.start_pos / 8))),
            "_lastItem" => Ok(Some(Value::Bool(self.last_item.unwrap_or(false)))),
            "lengthInBits" | "lengthInBytes" => {
                let (Some(Mode::Write), Some(message)) = (self.mode, self.message) else {
                    return Err(CodecError::invalid_expression(format!(
                        "{} of {} is only known while serializing",
                        name, self.spec.name
                    )));
                };
                let bits = self
                    .registry
                    .measure(self.spec, message, self.args.clone(), self.last_item)?;
                Ok(Some(Value::from(if name == "lengthInBits" { bits } else { bits.div_ceil(8) })))
            }
            _ => Ok(None),
        }
    }

    fn variable(&self, name: &str) -> Option<Value> {
        if let Some((_, v)) = self.fields.iter().rev().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        if let Some(v) = self.message.and_then(|m| m.get(name)) {
            return Some(v.clone());
        }
        if let Some(v) = self.transient_value(name) {
            return Some(v);
        }
        if let Some((_, v)) = self.args.iter().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        // declared but not read yet, or an absent optional
        self.spec.declares(name).then_some(Value::Null)
    }

    fn enum_member(&self, type_name: &str, member: &str) -> Option<Value> {
        self.registry.enum_value(type_name, member)
    }

    fn property(&self, base: &Value, name: &str) -> Result<Value> {
        match base {
            Value::Message(m) => {
                if let Some(v) = m.get(name) {
                    return Ok(v.clone());
                }
                match name {
                    "lengthInBits" => Ok(Value::from(self.registry.measure_nested(m)?)),
                    "lengthInBytes" => Ok(Value::from(self.registry.measure_nested(m)?.div_ceil(8))),
                    _ => self.registry.discriminator_of(m, name).ok_or_else(|| {
                        CodecError::invalid_expression(format!("'{}' has no field '{}'", m.display_name(), name))
                    }),
                }
            }
            Value::Enum { type_name, symbol, .. } => {
                let spec = self.registry.enum_spec(type_name)?;
                spec.by_symbol(symbol)
                    .and_then(|m| m.properties.iter().find(|(n, _)| n == name))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| {
                        CodecError::invalid_expression(format!("{}.{} has no property '{}'", type_name, symbol, name))
                    })
            }
            other => Err(CodecError::invalid_expression(format!(
                "cannot read '{}' of a {} value",
                name,
                other.kind()
            ))),
        }
    }

    fn size_in_bytes(&self, value: &Value) -> Result<u64> {
        match value {
            Value::Null => Ok(0),
            Value::List(items) => items.iter().map(|i| self.size_in_bytes(i)).sum(),
            Value::Message(m) => Ok(self.registry.measure_nested(m)?.div_ceil(8)),
            Value::String(s) => Ok(s.len() as u64),
            other => Err(CodecError::invalid_expression(format!(
                "wire size of a {} value is not known",
                other.kind()
            ))),
        }
    }

    fn static_call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.registry.call_static(name, args)
    }
}

/// Binds `_item` for TERMINATED loop conditions.
struct ItemScope<'s> {
    parent: &'s dyn Scope,
    item: &'s Value,
}

impl Scope for ItemScope<'_> {
    fn builtin(&self, name: &str) -> Result<Option<Value>> {
        self.parent.builtin(name)
    }

    fn variable(&self, name: &str) -> Option<Value> {
        if name == "_item" {
            return Some(self.item.clone());
        }
        self.parent.variable(name)
    }

    fn enum_member(&self, type_name: &str, member: &str) -> Option<Value> {
        self.parent.enum_member(type_name, member)
    }

    fn property(&self, base: &Value, name: &str) -> Result<Value> {
        self.parent.property(base, name)
    }

    fn size_in_bytes(&self, value: &Value) -> Result<u64> {
        self.parent.size_in_bytes(value)
    }

    fn static_call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.parent.static_call(name, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CodecOptions;

    fn io_data_object() -> TypeSpec {
        TypeSpec::new("IoDataObject")
            .field(FieldSpec::simple("slotNumber", TypeRef::UInt(16)))
            .field(FieldSpec::simple("subSlotNumber", TypeRef::UInt(16)))
            .field(FieldSpec::simple("ioFrameOffset", TypeRef::UInt(16)))
    }

    fn family() -> TypeRegistry {
        TypeRegistry::builder()
            .add_enum(EnumSpec::new("Kind", 2).member("ALPHA", 0).member("BETA", 1).member("GAMMA", 2))
            .add_type(
                TypeSpec::new("Family")
                    .field(FieldSpec::discriminator("kind", TypeRef::enumeration("Kind")))
                    .field(FieldSpec::reserved(TypeRef::UInt(6), 0))
                    .switch(
                        SwitchSpec::new(&["kind"])
                            .unwrap()
                            .case(
                                CaseSpec::new("FamilyAlpha", vec![Some(DiscriminatorValue::Enum("ALPHA".into()))])
                                    .field(FieldSpec::simple("value", TypeRef::UInt(8))),
                            )
                            .case(CaseSpec::new("FamilyBeta", vec![Some(DiscriminatorValue::Enum("BETA".into()))])),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_flat_message_round_trip() {
        let registry = TypeRegistry::builder().add_type(io_data_object()).build().unwrap();
        let bytes = hex::decode("000100020003").unwrap();
        let msg = registry.from_bytes("IoDataObject", &bytes, &[]).unwrap();
        assert_eq!(msg.get("slotNumber"), Some(&Value::Int(1)));
        assert_eq!(msg.get("subSlotNumber"), Some(&Value::Int(2)));
        assert_eq!(msg.get("ioFrameOffset"), Some(&Value::Int(3)));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), bytes);
        assert_eq!(registry.length_in_bits(&msg, &[]).unwrap(), 48);
    }

    #[test]
    fn test_unsupported_discriminator_stops_after_discriminator() {
        let registry = family();
        let bytes = [0b1000_0000, 0xFF];
        let mut rb = ReadBuffer::new(&bytes);
        let err = registry.parse("Family", &mut rb, &[]).unwrap_err();
        assert!(
            matches!(err, CodecError::UnsupportedDiscriminator { ref type_name, position: 8, .. } if type_name == "Family"),
            "{}",
            err
        );
        // reserved bits are shared fields and come before the switch
        assert_eq!(rb.position(), 8);

        let only_discriminator = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Tiny")
                    .field(FieldSpec::discriminator("kind", TypeRef::UInt(2)))
                    .switch(
                        SwitchSpec::new(&["kind"])
                            .unwrap()
                            .case(CaseSpec::new("TinyZero", vec![Some(DiscriminatorValue::Int(0))]))
                            .case(CaseSpec::new("TinyOne", vec![Some(DiscriminatorValue::Int(1))])),
                    ),
            )
            .build()
            .unwrap();
        let mut rb = ReadBuffer::new(&bytes);
        assert!(matches!(
            only_discriminator.parse("Tiny", &mut rb, &[]),
            Err(CodecError::UnsupportedDiscriminator { position: 2, .. })
        ));
        assert_eq!(rb.position(), 2);
    }

    #[test]
    fn test_discriminated_round_trip() {
        let registry = family();
        let msg = registry.from_bytes("Family", &[0x00, 0x2A], &[]).unwrap();
        assert_eq!(msg.case_name(), Some("FamilyAlpha"));
        assert_eq!(msg.fields().len(), 1);
        assert_eq!(msg.get("value"), Some(&Value::Int(42)));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), vec![0x00, 0x2A]);

        let beta = ParsedMessage::with_case("Family", "FamilyBeta", Vec::new());
        assert_eq!(registry.to_bytes(&beta, &[]).unwrap(), vec![0x40]);
        assert_eq!(registry.length_in_bits(&beta, &[]).unwrap(), 8);
    }

    #[test]
    fn test_duplicate_discriminator_rejected() {
        let result = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Dup")
                    .field(FieldSpec::discriminator("kind", TypeRef::UInt(8)))
                    .switch(
                        SwitchSpec::new(&["kind"])
                            .unwrap()
                            .case(CaseSpec::new("DupA", vec![Some(DiscriminatorValue::Int(1))]))
                            .case(CaseSpec::new("DupB", vec![Some(DiscriminatorValue::Int(1))])),
                    ),
            )
            .build();
        assert!(matches!(result, Err(CodecError::InvalidParameter { .. })));
    }

    #[test]
    fn test_wildcard_case_shadowing_rejected() {
        let build = |cases: [CaseSpec; 2]| {
            let [first, second] = cases;
            TypeRegistry::builder()
                .add_type(
                    TypeSpec::new("Pair")
                        .field(FieldSpec::discriminator("major", TypeRef::UInt(4)))
                        .field(FieldSpec::discriminator("minor", TypeRef::UInt(4)))
                        .switch(SwitchSpec::new(&["major", "minor"]).unwrap().case(first).case(second)),
                )
                .build()
        };
        let wild = || CaseSpec::new("PairWild", vec![Some(DiscriminatorValue::Int(1)), None]);
        let exact = || CaseSpec::new("PairExact", vec![Some(DiscriminatorValue::Int(1)), Some(DiscriminatorValue::Int(2))]);

        assert!(matches!(build([wild(), exact()]), Err(CodecError::InvalidParameter { .. })));
        assert!(matches!(build([exact(), wild()]), Err(CodecError::InvalidParameter { .. })));

        let other = CaseSpec::new("PairOther", vec![Some(DiscriminatorValue::Int(2)), None]);
        let registry = build([exact(), other]).unwrap();
        assert_eq!(registry.from_bytes("Pair", &[0x12], &[]).unwrap().case_name(), Some("PairExact"));
        assert_eq!(registry.from_bytes("Pair", &[0x2F], &[]).unwrap().case_name(), Some("PairOther"));
    }

    #[test]
    fn test_unknown_references_rejected() {
        let missing_type = TypeRegistry::builder()
            .add_type(TypeSpec::new("Outer").field(FieldSpec::simple("inner", TypeRef::complex("Inner"))))
            .build();
        assert!(missing_type.is_err());

        let missing_static = TypeRegistry::builder()
            .add_type(TypeSpec::new("Crc").field(
                FieldSpec::checksum("crc", TypeRef::UInt(16), "STATIC_CALL(\"crc16\", 1)").unwrap(),
            ))
            .build();
        assert!(missing_static.is_err());

        let bad_function = TypeRegistry::builder()
            .add_type(TypeSpec::new("Bad").field(FieldSpec::virtual_field("v", "LEN(x)").unwrap()))
            .build();
        assert!(matches!(bad_function, Err(CodecError::InvalidExpression { .. })));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let misspelled = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Sized")
                    .field(FieldSpec::implicit("len", TypeRef::UInt(8), "lenghtInBytes").unwrap())
                    .field(FieldSpec::simple("value", TypeRef::UInt(8))),
            )
            .build();
        assert!(matches!(misspelled, Err(CodecError::InvalidExpression { .. })));

        let item_outside_loop = TypeRegistry::builder()
            .add_type(TypeSpec::new("Loose").field(FieldSpec::virtual_field("v", "_item + 1").unwrap()))
            .build();
        assert!(matches!(item_outside_loop, Err(CodecError::InvalidExpression { .. })));

        let unknown_enum = TypeRegistry::builder()
            .add_type(TypeSpec::new("Flag").field(FieldSpec::virtual_field("v", "Missing.ON").unwrap()))
            .build();
        assert!(matches!(unknown_enum, Err(CodecError::InvalidExpression { .. })));
    }

    #[test]
    fn test_measure_agrees_with_serialize() {
        let registry = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Sized")
                    .field(FieldSpec::implicit("len", TypeRef::UInt(8), "lengthInBytes").unwrap())
                    .field(FieldSpec::simple("value", TypeRef::UInt(8))),
            )
            .add_type(
                TypeSpec::new("Ratio")
                    .field(FieldSpec::implicit("half", TypeRef::UInt(8), "value / 0").unwrap())
                    .field(FieldSpec::simple("value", TypeRef::UInt(8))),
            )
            .build()
            .unwrap();
        let sized = registry.from_bytes("Sized", &hex::decode("0207").unwrap(), &[]).unwrap();
        assert_eq!(registry.to_bytes(&sized, &[]).unwrap(), hex::decode("0207").unwrap());
        assert_eq!(registry.length_in_bits(&sized, &[]).unwrap(), 16);

        let ratio = registry.from_bytes("Ratio", &hex::decode("0004").unwrap(), &[]).unwrap();
        assert!(registry.to_bytes(&ratio, &[]).is_err());
        assert!(registry.length_in_bits(&ratio, &[]).is_err());
    }

    #[test]
    fn test_reserved_tolerance() {
        let registry = family();
        let mut rb = ReadBuffer::new(&[0x05, 0x07]);
        let msg = registry.parse("Family", &mut rb, &[]).unwrap();
        assert_eq!(rb.warnings().len(), 1);
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), vec![0x00, 0x07]);

        let strict = CodecOptions::new().with_strict(true);
        let mut rb = ReadBuffer::with_options(&[0x05, 0x07], strict);
        assert!(matches!(
            registry.parse("Family", &mut rb, &[]),
            Err(CodecError::ReservedValueMismatch { .. })
        ));
    }

    fn named_block() -> TypeRegistry {
        TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Block")
                    .field(FieldSpec::implicit("blockLength", TypeRef::UInt(8), "lengthInBytes - 1").unwrap())
                    .field(FieldSpec::implicit("nameLength", TypeRef::UInt(8), "STR_LEN(name)").unwrap())
                    .field(FieldSpec::simple(
                        "name",
                        TypeRef::string("nameLength * 8", TextEncoding::Ascii).unwrap(),
                    ))
                    .field(FieldSpec::optional("extra", TypeRef::UInt(8), Some("blockLength > nameLength + 1")).unwrap()),
            )
            .add_type(
                TypeSpec::new("Blocks")
                    .field(FieldSpec::implicit("numBlocks", TypeRef::UInt(8), "COUNT(blocks)").unwrap())
                    .field(FieldSpec::array("blocks", TypeRef::complex("Block"), ArrayLoop::count("numBlocks").unwrap())),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_implicit_fields_recomputed() {
        let registry = named_block();
        let bytes = hex::decode("02 04 02 6162 07 02 01 78".replace(' ', "")).unwrap();
        let msg = registry.from_bytes("Blocks", &bytes, &[]).unwrap();
        let blocks = msg.get("blocks").unwrap().as_list().unwrap();
        assert_eq!(blocks.len(), 2);
        let first = blocks[0].as_message().unwrap();
        assert_eq!(first.get("name"), Some(&Value::String("ab".into())));
        assert_eq!(first.get("extra"), Some(&Value::Int(7)));
        assert_eq!(first.get("blockLength"), None);
        let second = blocks[1].as_message().unwrap();
        assert_eq!(second.get("extra"), Some(&Value::Null));

        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), bytes);
        assert_eq!(registry.length_in_bits(&msg, &[]).unwrap(), bytes.len() as u64 * 8);
    }

    #[test]
    fn test_count_zero_and_length_bound() {
        let registry = named_block();
        let msg = registry.from_bytes("Blocks", &[0x00], &[]).unwrap();
        assert_eq!(msg.get("blocks"), Some(&Value::List(Vec::new())));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), vec![0x00]);

        let registry = TypeRegistry::builder()
            .add_type(io_data_object())
            .add_type(
                TypeSpec::new("Objects")
                    .field(FieldSpec::implicit("size", TypeRef::UInt(8), "ARRAY_SIZE_IN_BYTES(objects)").unwrap())
                    .field(FieldSpec::array(
                        "objects",
                        TypeRef::complex("IoDataObject"),
                        ArrayLoop::length("size").unwrap(),
                    )),
            )
            .build()
            .unwrap();
        let bytes = hex::decode("06000100020003ffff").unwrap();
        let msg = registry.from_bytes("Objects", &bytes, &[]).unwrap();
        assert_eq!(msg.get("objects").unwrap().as_list().unwrap().len(), 1);
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), &bytes[..7]);
    }

    #[test]
    fn test_terminated_array_includes_terminal() {
        let registry = TypeRegistry::builder()
            .add_type(TypeSpec::new("Sysex").field(FieldSpec::array(
                "data",
                TypeRef::UInt(8),
                ArrayLoop::terminated("_item == 0xF7").unwrap(),
            )))
            .build()
            .unwrap();
        let msg = registry.from_bytes("Sysex", &[0x01, 0x02, 0xF7, 0x09], &[]).unwrap();
        assert_eq!(msg.get("data"), Some(&Value::bytes(&[0x01, 0x02, 0xF7])));

        let msg = registry.from_bytes("Sysex", &[0x01, 0x02], &[]).unwrap();
        assert_eq!(msg.get("data"), Some(&Value::bytes(&[0x01, 0x02])));
    }

    #[test]
    fn test_params_and_padding() {
        let registry = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Item")
                    .field(FieldSpec::implicit("len", TypeRef::UInt(8), "COUNT(data)").unwrap())
                    .field(FieldSpec::array("data", TypeRef::UInt(8), ArrayLoop::count("len").unwrap()))
                    .field(FieldSpec::padding(TypeRef::UInt(8), "0x00", "!_lastItem && (COUNT(data) % 2) == 1").unwrap()),
            )
            .add_type(
                TypeSpec::new("Items")
                    .params(&["numItems"])
                    .field(FieldSpec::array("items", TypeRef::complex("Item"), ArrayLoop::count("numItems").unwrap())),
            )
            .build()
            .unwrap();
        let bytes = hex::decode("010100020102").unwrap();
        assert!(registry.from_bytes("Items", &bytes, &[]).is_err());

        let args = [("numItems", Value::Int(2))];
        let msg = registry.from_bytes("Items", &bytes, &args).unwrap();
        let items = msg.get("items").unwrap().as_list().unwrap();
        assert_eq!(items[0].as_message().unwrap().get("data"), Some(&Value::bytes(&[0x01])));
        assert_eq!(items[1].as_message().unwrap().get("data"), Some(&Value::bytes(&[0x01, 0x02])));
        assert_eq!(registry.to_bytes(&msg, &args).unwrap(), bytes);
    }

    #[derive(Debug)]
    struct Bcd;

    impl ManualCodec for Bcd {
        fn parse(&self, rb: &mut ReadBuffer<'_>, _scope: &dyn Scope) -> Result<Value> {
            let raw = rb.read_u8("bcd")?;
            Ok(Value::Int(i128::from((raw >> 4) * 10 + (raw & 0x0F))))
        }

        fn serialize(&self, wb: &mut WriteBuffer, value: &Value, _scope: &dyn Scope) -> Result<()> {
            let v = value.as_u64()? as u8;
            wb.write_u8("bcd", ((v / 10) << 4) | (v % 10))
        }
    }

    #[test]
    fn test_manual_and_checksum_fields() {
        let registry = TypeRegistry::builder()
            .add_static("sum", |_, args| {
                let total: i128 = args.iter().map(|a| a.as_int()).sum::<Result<i128>>()?;
                Ok(Value::Int(total & 0xFF))
            })
            .add_type(
                TypeSpec::new("Clock")
                    .field(FieldSpec::manual("hour", Arc::new(Bcd)))
                    .field(FieldSpec::simple("minute", TypeRef::UInt(8)))
                    .field(FieldSpec::checksum("check", TypeRef::UInt(8), "STATIC_CALL(\"sum\", hour, minute)").unwrap()),
            )
            .build()
            .unwrap();
        let msg = registry.from_bytes("Clock", &[0x23, 0x10, 0x27], &[]).unwrap();
        assert_eq!(msg.get("hour"), Some(&Value::Int(23)));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), vec![0x23, 0x10, 0x27]);

        let validating = CodecOptions::new().with_checksum_validation(true);
        let mut rb = ReadBuffer::with_options(&[0x23, 0x10, 0x00], validating);
        assert!(matches!(
            registry.parse("Clock", &mut rb, &[]),
            Err(CodecError::ChecksumMismatch { expected: 0x27, .. })
        ));
    }

    #[test]
    fn test_nested_discriminator_and_enum_property() {
        let registry = TypeRegistry::builder()
            .add_enum(
                EnumSpec::new("Size", 8)
                    .member_with("BYTE", 0x02, vec![("sizeInBytes", Value::Int(1))])
                    .member_with("WORD", 0x04, vec![("sizeInBytes", Value::Int(2))]),
            )
            .add_type(
                TypeSpec::new("Header")
                    .field(FieldSpec::discriminator("code", TypeRef::UInt(8)))
                    .field(FieldSpec::simple("size", TypeRef::enumeration("Size")))
                    .switch(
                        SwitchSpec::new(&["code"])
                            .unwrap()
                            .case(CaseSpec::new("HeaderRead", vec![Some(DiscriminatorValue::Int(4))]))
                            .case(CaseSpec::new("HeaderWrite", vec![Some(DiscriminatorValue::Int(5))])),
                    ),
            )
            .add_type(
                TypeSpec::new("Frame")
                    .field(FieldSpec::simple("header", TypeRef::complex("Header")))
                    .field(FieldSpec::array(
                        "data",
                        TypeRef::UInt(8),
                        ArrayLoop::count("header.code == 5 ? header.size.sizeInBytes : 0").unwrap(),
                    )),
            )
            .build()
            .unwrap();
        let bytes = [0x05, 0x04, 0xAA, 0xBB];
        let msg = registry.from_bytes("Frame", &bytes, &[]).unwrap();
        assert_eq!(msg.get("data"), Some(&Value::bytes(&[0xAA, 0xBB])));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), bytes);

        let read = registry.from_bytes("Frame", &[0x04, 0x02], &[]).unwrap();
        assert_eq!(read.get("data"), Some(&Value::List(Vec::new())));
    }

    #[test]
    fn test_const_and_byte_order() {
        let registry = TypeRegistry::builder()
            .add_type(
                TypeSpec::new("Uuid")
                    .field(
                        FieldSpec::constant("data1", TypeRef::UInt(32), 0xDEA0_0000).with_byte_order(ByteOrder::LittleEndian),
                    )
                    .field(FieldSpec::simple("node", TypeRef::UInt(16))),
            )
            .build()
            .unwrap();
        let msg = registry.from_bytes("Uuid", &[0x00, 0x00, 0xA0, 0xDE, 0x12, 0x34], &[]).unwrap();
        assert_eq!(msg.get("node"), Some(&Value::Int(0x1234)));
        assert!(matches!(
            registry.from_bytes("Uuid", &[0xDE, 0xA0, 0x00, 0x00, 0x12, 0x34], &[]),
            Err(CodecError::ConstValueMismatch { .. })
        ));
    }
}
