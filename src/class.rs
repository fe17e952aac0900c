//! Class metadata: members with per-slot offsets, globals, operators, base
//! linearization, visibility enforcement.

use std::collections::HashMap;

use crate::reference::{Reference, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Sentinel ids for the builtin container metatypes. The operator
    /// kernel special-cases `ObjectPayload` directly for arithmetic and
    /// comparison, rather than routing a builtin container through the
    /// generic member/operator tables a user-defined class would need —
    /// but an overload lookup that does reach `ClassRegistry::get` (a
    /// string with no matching primitive-kernel arm, say) still needs a
    /// real, empty `Class` entry to land on instead of indexing out of
    /// bounds, which is what `ClassRegistry::builtins` holds.
    pub const BUILTIN_STRING: ClassId = ClassId(u32::MAX);
    pub const BUILTIN_ARRAY: ClassId = ClassId(u32::MAX - 1);
    pub const BUILTIN_HASH: ClassId = ClassId(u32::MAX - 2);
    pub const BUILTIN_ITERATOR: ClassId = ClassId(u32::MAX - 3);
    pub const BUILTIN_REGEX: ClassId = ClassId(u32::MAX - 4);
}

/// Coarse class category the operator kernel uses to bypass vtable lookup
/// for builtin containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metatype {
    Object,
    String,
    Regex,
    Array,
    Hash,
    Iterator,
    Library,
    LibObject,
}

/// Every overloadable operator, used to index `Class::operators`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    BAnd,
    BOr,
    Xor,
    Shl,
    Shr,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Neg,
    Plus,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    Call,
    New,
    Delete,
    Copy,
    Subscript,
    SubscriptMove,
    In,
    ToString,
    ToNumber,
    ToBoolean,
}

pub const OPERATOR_COUNT: usize = Operator::ToBoolean as usize + 1;

const ALL_OPERATORS: [Operator; OPERATOR_COUNT] = [
    Operator::Add,
    Operator::Sub,
    Operator::Mul,
    Operator::Div,
    Operator::Pow,
    Operator::Mod,
    Operator::BAnd,
    Operator::BOr,
    Operator::Xor,
    Operator::Shl,
    Operator::Shr,
    Operator::Not,
    Operator::And,
    Operator::Or,
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Gt,
    Operator::Le,
    Operator::Ge,
    Operator::Neg,
    Operator::Plus,
    Operator::PreInc,
    Operator::PreDec,
    Operator::PostInc,
    Operator::PostDec,
    Operator::Call,
    Operator::New,
    Operator::Delete,
    Operator::Copy,
    Operator::Subscript,
    Operator::SubscriptMove,
    Operator::In,
    Operator::ToString,
    Operator::ToNumber,
    Operator::ToBoolean,
];

impl Operator {
    /// Decode an `Operator` from its `#[repr(usize)]` ordinal, the form
    /// `init_operator_call` stores inline in the bytecode.
    pub fn from_index(index: usize) -> Option<Operator> {
        ALL_OPERATORS.get(index).copied()
    }
}

/// Metadata for one member: a stable slot offset (for slotted, non-global
/// members), the class that declared it, a default value template, and
/// flags.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub owner: ClassId,
    pub offset: Option<usize>,
    pub global: bool,
    pub visibility: Visibility,
    pub is_final: bool,
    pub is_override: bool,
    /// Per-arity signatures this member answers to, if it is callable.
    /// Positive N = exactly N parameters; negative = variadic encoding
    ///. Empty for non-function members.
    pub signatures: Vec<i32>,
    pub default: Option<Reference>,
}

pub struct ClassBuilder {
    pub name: String,
    pub metatype: Metatype,
    pub bases: Vec<ClassId>,
    pub own_members: Vec<MemberInfo>,
    pub own_operators: HashMap<Operator, MemberInfo>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>, metatype: Metatype) -> Self {
        ClassBuilder {
            name: name.into(),
            metatype,
            bases: Vec::new(),
            own_members: Vec::new(),
            own_operators: HashMap::new(),
        }
    }

    pub fn with_base(mut self, base: ClassId) -> Self {
        self.bases.push(base);
        self
    }

    pub fn with_member(mut self, member: MemberInfo) -> Self {
        self.own_members.push(member);
        self
    }

    pub fn with_operator(mut self, op: Operator, member: MemberInfo) -> Self {
        self.own_operators.insert(op, member);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub metatype: Metatype,
    pub members: HashMap<String, MemberInfo>,
    pub globals: HashMap<String, MemberInfo>,
    pub operators: HashMap<Operator, MemberInfo>,
    pub bases: Vec<ClassId>,
    pub slot_count: usize,
    pub is_copyable: bool,
    generated: bool,
}

#[derive(Debug)]
pub enum ClassGenError {
    /// A member flagged `override` did not match any base member.
    NoBaseMember { member: String },
    /// A member tried to override a base member flagged `final`.
    OverrideOfFinal { member: String },
}

impl Class {
    fn new_unlinearized(id: ClassId, builder: ClassBuilder) -> Self {
        Class {
            id,
            name: builder.name,
            metatype: builder.metatype,
            members: HashMap::new(),
            globals: HashMap::new(),
            operators: HashMap::new(),
            bases: builder.bases,
            slot_count: 0,
            is_copyable: true,
            generated: false,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn find_member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.get(name).or_else(|| self.globals.get(name))
    }

    pub fn find_operator(&self, op: Operator) -> Option<&MemberInfo> {
        self.operators.get(&op)
    }

    /// Visibility check for a member access from code executing with
    /// class context `from`. `from_package`/`owner_package`
    /// model the `package` visibility rule.
    pub fn can_access(&self, member: &MemberInfo, from: Option<ClassId>, same_package: bool) -> bool {
        match member.visibility {
            Visibility::Public => true,
            Visibility::Private => from == Some(member.owner),
            Visibility::Protected => from == Some(member.owner) || from.map(|f| f == self.id).unwrap_or(false),
            Visibility::Package => same_package,
        }
    }

    /// A pre-generated, memberless class for one of the builtin container
    /// metatypes — stands in for `Class::new_unlinearized` + `generate`,
    /// which a sentinel id never goes through.
    fn builtin(id: ClassId, name: &str, metatype: Metatype) -> Self {
        Class {
            id,
            name: name.to_string(),
            metatype,
            members: HashMap::new(),
            globals: HashMap::new(),
            operators: HashMap::new(),
            bases: Vec::new(),
            slot_count: 0,
            is_copyable: false,
            generated: true,
        }
    }
}

/// Which slot in `ClassRegistry::builtins` a sentinel id maps to, or
/// `None` for an ordinary declared class.
fn builtin_slot(id: ClassId) -> Option<usize> {
    if id == ClassId::BUILTIN_STRING {
        Some(0)
    } else if id == ClassId::BUILTIN_ARRAY {
        Some(1)
    } else if id == ClassId::BUILTIN_HASH {
        Some(2)
    } else if id == ClassId::BUILTIN_ITERATOR {
        Some(3)
    } else if id == ClassId::BUILTIN_REGEX {
        Some(4)
    } else {
        None
    }
}

pub struct ClassRegistry {
    classes: Vec<Option<Class>>,
    builders: Vec<Option<ClassBuilder>>,
    by_name: HashMap<String, ClassId>,
    /// Real `Class` entries for the sentinel builtin ids, indexed by
    /// `builtin_slot` — keeps `get`/`get_mut` from ever indexing
    /// `classes` with one of `u32::MAX - 4 ..= u32::MAX`.
    builtins: [Class; 5],
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry {
            classes: Vec::new(),
            builders: Vec::new(),
            by_name: HashMap::new(),
            builtins: [
                Class::builtin(ClassId::BUILTIN_STRING, "String", Metatype::String),
                Class::builtin(ClassId::BUILTIN_ARRAY, "Array", Metatype::Array),
                Class::builtin(ClassId::BUILTIN_HASH, "Hash", Metatype::Hash),
                Class::builtin(ClassId::BUILTIN_ITERATOR, "Iterator", Metatype::Iterator),
                Class::builtin(ClassId::BUILTIN_REGEX, "Regex", Metatype::Regex),
            ],
        }
    }

    /// Register a class's raw declaration, to be linearized later by
    /// `generate`. Returns the `ClassId` immediately so forward/recursive
    /// base references can be recorded before generation runs.
    pub fn declare(&mut self, builder: ClassBuilder) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert(builder.name.clone(), id);
        self.classes.push(None);
        self.builders.push(Some(builder));
        id
    }

    pub fn find_by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ClassId) -> &Class {
        if let Some(slot) = builtin_slot(id) {
            return &self.builtins[slot];
        }
        self.classes[id.0 as usize].as_ref().expect("class not generated")
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut Class {
        if let Some(slot) = builtin_slot(id) {
            return &mut self.builtins[slot];
        }
        self.classes[id.0 as usize].as_mut().expect("class not generated")
    }

    /// `generate`: idempotent class linearization. A second
    /// call is a no-op, returning the cached metadata.
    pub fn generate(&mut self, id: ClassId) -> Result<(), ClassGenError> {
        if self.classes[id.0 as usize].is_some() {
            return Ok(());
        }
        let builder = self.builders[id.0 as usize].take().expect("class declared twice");
        let bases = builder.bases.clone();
        for &base in &bases {
            self.generate(base)?;
        }

        let own_members = builder.own_members.clone();
        let own_operators = builder.own_operators.clone();
        let mut class = Class::new_unlinearized(id, builder);

        // Inherit base members/operators in declaration order; a later
        // base's member of the same name is treated as an override
        // candidate layered on top of the earlier one.
        let mut next_offset = 0usize;
        for &base in &class.bases {
            let base_class = self.get(base);
            for (name, member) in &base_class.members {
                if !class.members.contains_key(name) {
                    let mut inherited = member.clone();
                    inherited.offset = Some(next_offset);
                    next_offset += 1;
                    class.members.insert(name.clone(), inherited);
                }
            }
            for (name, member) in &base_class.globals {
                class.globals.entry(name.clone()).or_insert_with(|| member.clone());
            }
            for (op, member) in &base_class.operators {
                class.operators.entry(*op).or_insert_with(|| member.clone());
            }
            class.is_copyable &= base_class.is_copyable;
        }

        // Layer this class's own declarations on top. A member flagged
        // `override` must match a base member of the same name; if that
        // base member is `final` the class is rejected.
        for mut member in own_members {
            member.owner = id;
            if member.is_override {
                let base_member = class.members.get(&member.name);
                match base_member {
                    None => return Err(ClassGenError::NoBaseMember { member: member.name.clone() }),
                    Some(base_member) if base_member.is_final => {
                        return Err(ClassGenError::OverrideOfFinal { member: member.name.clone() });
                    }
                    Some(base_member) => {
                        // Per-arity function dispatch merge: the override's
                        // signature set must be a superset of the base's.
                        let mut merged = base_member.signatures.clone();
                        for sig in &member.signatures {
                            if !merged.contains(sig) {
                                merged.push(*sig);
                            }
                        }
                        member.signatures = merged;
                    }
                }
            }
            if member.global {
                class.globals.insert(member.name.clone(), member);
            } else {
                let offset = member.offset.unwrap_or_else(|| {
                    let o = next_offset;
                    next_offset += 1;
                    o
                });
                member.offset = Some(offset);
                class.members.insert(member.name.clone(), member);
            }
        }

        for (op, mut member) in own_operators {
            member.owner = id;
            if member.is_override {
                if let Some(base_member) = class.operators.get(&op) {
                    if base_member.is_final {
                        return Err(ClassGenError::OverrideOfFinal { member: member.name.clone() });
                    }
                    let mut merged = base_member.signatures.clone();
                    for sig in &member.signatures {
                        if !merged.contains(sig) {
                            merged.push(*sig);
                        }
                    }
                    member.signatures = merged;
                } else {
                    return Err(ClassGenError::NoBaseMember { member: member.name.clone() });
                }
            }
            if op == Operator::Copy {
                class.is_copyable = false;
            }
            class.operators.insert(op, member);
        }

        class.slot_count = next_offset;
        class.generated = true;
        self.classes[id.0 as usize] = Some(class);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sentinel_ids_resolve_without_indexing_the_class_table() {
        let registry = ClassRegistry::new();
        let string_class = registry.get(ClassId::BUILTIN_STRING);
        assert_eq!(string_class.metatype, Metatype::String);
        assert_eq!(string_class.name, "String");
        let array_class = registry.get(ClassId::BUILTIN_ARRAY);
        assert_eq!(array_class.metatype, Metatype::Array);
    }

    #[test]
    fn overload_lookup_on_a_builtin_with_no_operator_errors_instead_of_panicking() {
        let registry = ClassRegistry::new();
        assert!(registry.get(ClassId::BUILTIN_HASH).find_operator(Operator::Add).is_none());
    }
}
