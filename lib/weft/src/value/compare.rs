use crate::value::Value;
use std::cmp::Ordering;

/// Tri-valued comparison result: `valid` is false when the two operands have
/// no defined ordering (a logical against a string, a scalar against a
/// container), in which case `value` carries no meaning.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ComparisonStatus {
    pub value: bool,
    pub valid: bool,
}

impl ComparisonStatus {
    #[inline]
    pub fn valid(value: bool) -> ComparisonStatus {
        ComparisonStatus { value, valid: true }
    }

    #[inline]
    pub fn invalid() -> ComparisonStatus {
        ComparisonStatus {
            value: false,
            valid: false,
        }
    }
}

/// Ordering between two values, or None when the pair is incomparable.
/// Numbers compare by mathematical value across Integer and Double;
/// same-kind containers compare lexicographically over their elements.
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Logical(a), Value::Logical(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
        (Value::Address(a), Value::Address(b)) => Some(a.octets().cmp(&b.octets())),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => compare_sequences(a.iter(), b.iter()),
        (Value::Set(a), Value::Set(b)) => compare_sequences(a.entries().iter(), b.entries().iter()),
        (Value::Map(a), Value::Map(b)) => {
            let flat_a = a.entries().iter().flat_map(|(key, value)| vec![key, value]);
            let flat_b = b.entries().iter().flat_map(|(key, value)| vec![key, value]);

            compare_pairs(flat_a, flat_b)
        }
        _ => None,
    }
}

fn compare_sequences<'a, I, J>(lhs: I, rhs: J) -> Option<Ordering>
where
    I: Iterator<Item = &'a Value>,
    J: Iterator<Item = &'a Value>,
{
    compare_pairs(lhs, rhs)
}

/// Lexicographic comparison over paired elements; length breaks ties. Any
/// incomparable element pair makes the whole comparison invalid.
fn compare_pairs<'a, I, J>(mut lhs: I, mut rhs: J) -> Option<Ordering>
where
    I: Iterator<Item = &'a Value>,
    J: Iterator<Item = &'a Value>,
{
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return Some(Ordering::Equal),
            (None, Some(_)) => return Some(Ordering::Less),
            (Some(_), None) => return Some(Ordering::Greater),
            (Some(a), Some(b)) => match compare(a, b)? {
                Ordering::Equal => continue,
                decided => return Some(decided),
            },
        }
    }
}

impl Value {
    pub fn less_than(&self, other: &Value) -> ComparisonStatus {
        match compare(self, other) {
            Some(order) => ComparisonStatus::valid(order == Ordering::Less),
            None => ComparisonStatus::invalid(),
        }
    }

    pub fn less_than_or_equal(&self, other: &Value) -> ComparisonStatus {
        match compare(self, other) {
            Some(order) => ComparisonStatus::valid(order != Ordering::Greater),
            None => ComparisonStatus::invalid(),
        }
    }

    pub fn greater_than(&self, other: &Value) -> ComparisonStatus {
        match compare(self, other) {
            Some(order) => ComparisonStatus::valid(order == Ordering::Greater),
            None => ComparisonStatus::invalid(),
        }
    }

    pub fn greater_than_or_equal(&self, other: &Value) -> ComparisonStatus {
        match compare(self, other) {
            Some(order) => ComparisonStatus::valid(order != Ordering::Less),
            None => ComparisonStatus::invalid(),
        }
    }

    /// Equality by value: Integer 2 and Double 2.0 are equal here even
    /// though they are not deeply (structurally) equal.
    pub fn equal_to(&self, other: &Value) -> ComparisonStatus {
        match compare(self, other) {
            Some(order) => ComparisonStatus::valid(order == Ordering::Equal),
            None => ComparisonStatus::invalid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Map, Set};
    use std::net::Ipv4Addr;

    #[test]
    fn test_numeric_cross_kind_comparison() {
        assert_eq!(
            Value::Integer(2).less_than(&Value::Double(2.5)),
            ComparisonStatus::valid(true)
        );
        assert_eq!(
            Value::Double(3.0).equal_to(&Value::Integer(3)),
            ComparisonStatus::valid(true)
        );
        assert_eq!(
            Value::Double(3.5).greater_than(&Value::Integer(3)),
            ComparisonStatus::valid(true)
        );
    }

    #[test]
    fn test_incompatible_kinds_are_invalid() {
        assert_eq!(
            Value::Logical(true).less_than(&Value::string("x")),
            ComparisonStatus::invalid()
        );
        assert_eq!(
            Value::string("abc").equal_to(&Value::Blob(b"abc".to_vec())),
            ComparisonStatus::invalid()
        );
        // A number against a container is the container's call, and
        // containers never compare to scalars.
        assert_eq!(
            Value::Integer(1).less_than(&Value::Array(vec![Value::Integer(1)])),
            ComparisonStatus::invalid()
        );
    }

    #[test]
    fn test_blob_ordering_is_lexicographic_with_length_tiebreak() {
        let short = Value::Blob(vec![1, 2]);
        let long = Value::Blob(vec![1, 2, 0]);

        assert_eq!(short.less_than(&long), ComparisonStatus::valid(true));
        assert_eq!(
            Value::Blob(vec![2]).greater_than(&Value::Blob(vec![1, 255])),
            ComparisonStatus::valid(true)
        );
        assert_eq!(
            Value::Blob(vec![1, 2]).equal_to(&Value::Blob(vec![1, 2])),
            ComparisonStatus::valid(true)
        );
    }

    #[test]
    fn test_address_ordering_by_octets() {
        let low = Value::Address(Ipv4Addr::new(10, 0, 0, 1));
        let high = Value::Address(Ipv4Addr::new(10, 0, 1, 0));

        assert_eq!(low.less_than(&high), ComparisonStatus::valid(true));
    }

    #[test]
    fn test_array_lexicographic_ordering() {
        let a = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::Array(vec![Value::Integer(1), Value::Integer(3)]);
        let c = Value::Array(vec![Value::Integer(1)]);

        assert_eq!(a.less_than(&b), ComparisonStatus::valid(true));
        assert_eq!(c.less_than(&a), ComparisonStatus::valid(true));
        assert_eq!(a.less_than_or_equal(&a.clone()), ComparisonStatus::valid(true));
    }

    #[test]
    fn test_array_with_incomparable_elements_is_invalid() {
        let a = Value::Array(vec![Value::Integer(1)]);
        let b = Value::Array(vec![Value::string("one")]);

        assert_eq!(a.less_than(&b), ComparisonStatus::invalid());
    }

    #[test]
    fn test_map_ordering_over_key_value_pairs() {
        let mut a = Map::new();
        a.add_value(Value::Integer(1), Value::Integer(10));
        let mut b = Map::new();
        b.add_value(Value::Integer(1), Value::Integer(20));

        assert_eq!(
            Value::Map(a).less_than(&Value::Map(b)),
            ComparisonStatus::valid(true)
        );
    }

    #[test]
    fn test_set_ordering() {
        let mut a = Set::new();
        a.add_value(Value::Integer(1));
        a.add_value(Value::Integer(2));
        let mut b = Set::new();
        b.add_value(Value::Integer(1));
        b.add_value(Value::Integer(3));

        assert_eq!(
            Value::Set(a).less_than(&Value::Set(b)),
            ComparisonStatus::valid(true)
        );
    }

    #[test]
    fn test_ordering_predicates_agree() {
        let one = Value::Integer(1);
        let two = Value::Integer(2);

        assert_eq!(one.less_than(&two), ComparisonStatus::valid(true));
        assert_eq!(one.less_than_or_equal(&two), ComparisonStatus::valid(true));
        assert_eq!(one.greater_than(&two), ComparisonStatus::valid(false));
        assert_eq!(one.greater_than_or_equal(&two), ComparisonStatus::valid(false));
        assert_eq!(two.greater_than(&one), ComparisonStatus::valid(true));
    }
}
