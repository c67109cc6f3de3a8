//! Kernel signatures: input matchers and output resolution.

use tessera_error::{Result, TesseraError};
use tessera_types::{ComplexLogicalType, LogicalType};

/// Predicate over one input type.
#[derive(Clone)]
pub enum InputType {
    Exact(LogicalType),
    Numeric,
    Integer,
    Floating,
    AnyOf(Vec<LogicalType>),
    Any,
}

impl InputType {
    #[must_use]
    pub fn matches(&self, t: &ComplexLogicalType) -> bool {
        match self {
            Self::Exact(tag) => t.tag() == *tag,
            Self::Numeric => t.tag().is_numeric(),
            Self::Integer => t.tag().is_integral(),
            Self::Floating => t.tag().is_floating(),
            Self::AnyOf(tags) => tags.contains(&t.tag()),
            Self::Any => true,
        }
    }
}

impl std::fmt::Debug for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(t) => write!(f, "exact({t:?})"),
            Self::Numeric => f.write_str("numeric"),
            Self::Integer => f.write_str("integer"),
            Self::Floating => f.write_str("floating"),
            Self::AnyOf(ts) => write!(f, "any_of({ts:?})"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// How a kernel names its output type.
#[derive(Clone)]
pub enum OutputType {
    Fixed(ComplexLogicalType),
    /// Resolved from the concrete input types at dispatch time.
    Computed(fn(&[ComplexLogicalType]) -> Result<ComplexLogicalType>),
}

impl OutputType {
    /// Output type identical to the first input.
    #[must_use]
    pub fn same_as_first() -> Self {
        Self::Computed(|inputs| {
            inputs.first().cloned().ok_or_else(|| {
                TesseraError::invalid("output resolver: no inputs to mirror")
            })
        })
    }

    pub fn resolve(&self, inputs: &[ComplexLogicalType]) -> Result<ComplexLogicalType> {
        match self {
            Self::Fixed(t) => Ok(t.clone()),
            Self::Computed(resolver) => resolver(inputs),
        }
    }
}

impl std::fmt::Debug for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(t) => write!(f, "fixed({t})"),
            Self::Computed(_) => f.write_str("computed"),
        }
    }
}

/// A kernel's full type contract.
#[derive(Debug, Clone)]
pub struct KernelSignature {
    pub input_types: Vec<InputType>,
    pub output: OutputType,
}

impl KernelSignature {
    #[must_use]
    pub fn new(input_types: Vec<InputType>, output: OutputType) -> Self {
        Self {
            input_types,
            output,
        }
    }

    /// Whether every input matcher accepts the corresponding type.
    #[must_use]
    pub fn matches_inputs(&self, types: &[ComplexLogicalType]) -> bool {
        self.input_types.len() == types.len()
            && self
                .input_types
                .iter()
                .zip(types.iter())
                .all(|(m, t)| m.matches(t))
    }
}

/// Argument-count contract of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub num_args: usize,
    pub varargs: bool,
}

impl Arity {
    #[must_use]
    pub const fn unary() -> Self {
        Self {
            num_args: 1,
            varargs: false,
        }
    }

    #[must_use]
    pub const fn binary() -> Self {
        Self {
            num_args: 2,
            varargs: false,
        }
    }

    #[must_use]
    pub const fn ternary() -> Self {
        Self {
            num_args: 3,
            varargs: false,
        }
    }

    #[must_use]
    pub const fn var_args(min: usize) -> Self {
        Self {
            num_args: min,
            varargs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matchers_cover_their_families() {
        assert!(InputType::Numeric.matches(&LogicalType::Integer.into()));
        assert!(InputType::Numeric.matches(&LogicalType::Double.into()));
        assert!(!InputType::Numeric.matches(&LogicalType::StringLiteral.into()));
        assert!(InputType::Integer.matches(&LogicalType::UBigInt.into()));
        assert!(!InputType::Integer.matches(&LogicalType::Float.into()));
        assert!(InputType::Floating.matches(&LogicalType::Float.into()));
        assert!(InputType::Any.matches(&LogicalType::Struct.into()));
        assert!(
            InputType::AnyOf(vec![LogicalType::Boolean, LogicalType::Na])
                .matches(&LogicalType::Na.into())
        );
    }

    #[test]
    fn signature_requires_full_match() {
        let sig = KernelSignature::new(
            vec![InputType::Numeric, InputType::Exact(LogicalType::Boolean)],
            OutputType::same_as_first(),
        );
        assert!(sig.matches_inputs(&[
            LogicalType::Integer.into(),
            LogicalType::Boolean.into()
        ]));
        assert!(!sig.matches_inputs(&[LogicalType::Integer.into()]));
        assert!(!sig.matches_inputs(&[
            LogicalType::Boolean.into(),
            LogicalType::Integer.into()
        ]));
    }

    #[test]
    fn output_resolvers() {
        let fixed = OutputType::Fixed(LogicalType::UBigInt.into());
        assert_eq!(
            fixed.resolve(&[]).unwrap().tag(),
            LogicalType::UBigInt
        );
        let same = OutputType::same_as_first();
        assert_eq!(
            same.resolve(&[LogicalType::Float.into()]).unwrap().tag(),
            LogicalType::Float
        );
        assert!(same.resolve(&[]).is_err());
    }
}
