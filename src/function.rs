//! `Function` — a map from signature (arity encoding) to (Handle, optional
//! capture map).

use std::collections::HashMap;

use crate::reference::Reference;

/// Identifies a callable entry point: (module, offset, package,
/// fast-symbol-count, generator-flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub module_id: u32,
    pub entry_offset: u32,
    pub package: u32,
    pub fast_symbol_count: u16,
    pub is_generator: bool,
}

/// One signature's target: where to jump, and what (if anything) it
/// closes over.
#[derive(Debug, Clone)]
pub struct Signature {
    pub handle: Handle,
    pub captures: Option<HashMap<String, Reference>>,
}

/// Convention: positive N = exactly N parameters; negative N
/// encodes a variadic with `-N-1` required parameters, the rest collected
/// into a trailing iterator argument.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub signatures: HashMap<i32, Signature>,
}

impl FunctionData {
    pub fn new() -> Self {
        FunctionData { signatures: HashMap::new() }
    }

    pub fn with_signature(mut self, arity: i32, signature: Signature) -> Self {
        self.signatures.insert(arity, signature);
        self
    }

    pub fn is_variadic_signature(arity: i32) -> bool {
        arity < 0
    }

    pub fn required_count(arity: i32) -> usize {
        if arity < 0 {
            (-arity - 1) as usize
        } else {
            arity as usize
        }
    }

    /// Resolve the best signature for a call with `argc` arguments: an exact match wins; otherwise the lowest-arity
    /// variadic signature whose required count is `<= argc` is chosen.
    pub fn resolve(&self, argc: usize) -> Option<(i32, &Signature)> {
        if let Some(sig) = self.signatures.get(&(argc as i32)) {
            return Some((argc as i32, sig));
        }
        self.signatures
            .iter()
            .filter(|(arity, _)| **arity < 0 && Self::required_count(**arity) <= argc)
            .min_by_key(|(arity, _)| Self::required_count(**arity))
            .map(|(arity, sig)| (*arity, sig))
    }

    /// `+` on functions merges their signature maps. Later (`other`) signatures win on collision.
    pub fn merge(&self, other: &FunctionData) -> FunctionData {
        let mut signatures = self.signatures.clone();
        for (arity, sig) in &other.signatures {
            signatures.insert(*arity, sig.clone());
        }
        FunctionData { signatures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(entry: u32) -> Signature {
        Signature {
            handle: Handle { module_id: 0, entry_offset: entry, package: 0, fast_symbol_count: 0, is_generator: false },
            captures: None,
        }
    }

    #[test]
    fn exact_arity_wins_over_variadic() {
        let f = FunctionData::new().with_signature(2, sig(1)).with_signature(-1, sig(2));
        let (arity, _) = f.resolve(2).unwrap();
        assert_eq!(arity, 2);
    }

    #[test]
    fn variadic_fallback_picks_lowest_required() {
        // def f(a, ...) -- required 1, accepts any argc >= 1
        let f = FunctionData::new().with_signature(-2, sig(1));
        let (arity, _) = f.resolve(1).unwrap();
        assert_eq!(arity, -2);
        assert_eq!(FunctionData::required_count(arity), 1);
        // B4: called with exactly one argument packs an empty extra-args iterator.
        assert_eq!(1usize.saturating_sub(FunctionData::required_count(arity)), 0);
    }

    #[test]
    fn no_signature_matches_too_few_args() {
        let f = FunctionData::new().with_signature(-2, sig(1));
        assert!(f.resolve(0).is_none());
    }
}
