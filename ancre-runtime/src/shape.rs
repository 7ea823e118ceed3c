//! Shape queries over facet's static shapes: layout, identity, struct fields, inline arrays.

use core::fmt;
use facet_core::{Def, Facet, Field, Shape, Type, UserType};
use std::alloc::Layout;

/// The subset of shape introspection the classifier and the resolution engine need.
pub trait IShape: Copy {
    /// Get the layout (size and alignment) of this shape.
    ///
    /// Returns `None` for unsized types.
    fn layout(&self) -> Option<Layout>;

    fn type_identifier(&self) -> &'static str;

    /// Type identity, not structural equality.
    fn same_as(&self, other: Self) -> bool;

    fn struct_fields(&self) -> Option<&'static [Field]>;

    /// Look up a field by its declared name.
    fn field_named(&self, name: &str) -> Option<&'static Field> {
        self.struct_fields()?.iter().find(|field| field.name == name)
    }

    /// Capacity of a fixed-size inline array (`[E; N]`).
    fn array_len(&self) -> Option<usize>;

    /// Element shape of a fixed-size inline array.
    fn array_element(&self) -> Option<Self>;
}

impl IShape for &'static Shape {
    #[inline]
    fn layout(&self) -> Option<Layout> {
        self.layout.sized_layout().ok()
    }

    #[inline]
    fn type_identifier(&self) -> &'static str {
        self.type_identifier
    }

    #[inline]
    fn same_as(&self, other: Self) -> bool {
        self.id == other.id
    }

    #[inline]
    fn struct_fields(&self) -> Option<&'static [Field]> {
        match &self.ty {
            Type::User(UserType::Struct(st)) => Some(st.fields),
            _ => None,
        }
    }

    #[inline]
    fn array_len(&self) -> Option<usize> {
        match self.def {
            Def::Array(def) => Some(def.n),
            _ => None,
        }
    }

    #[inline]
    fn array_element(&self) -> Option<Self> {
        match self.def {
            Def::Array(def) => Some(def.t()),
            _ => None,
        }
    }
}

/// A field resolved by name on an owner type: where it lives and what it holds.
///
/// Nested paths fold into a single token whose offset is relative to the outermost owner.
#[derive(Clone, Copy)]
pub struct FieldToken {
    declaring: &'static Shape,
    name: &'static str,
    offset: usize,
    shape: &'static Shape,
}

impl FieldToken {
    pub fn of<O>(name: &str) -> Option<Self>
    where
        O: Facet<'static>,
    {
        Self::lookup(O::SHAPE, name)
    }

    pub fn lookup(declaring: &'static Shape, name: &str) -> Option<Self> {
        let field = declaring.field_named(name)?;
        Some(Self {
            declaring,
            name: field.name,
            offset: field.offset,
            shape: field.shape(),
        })
    }

    /// Follow `names` through nested structs, starting at `declaring`.
    pub fn path(declaring: &'static Shape, names: &[&str]) -> Option<Self> {
        let (first, rest) = names.split_first()?;
        let mut token = Self::lookup(declaring, first)?;
        for name in rest {
            let inner = Self::lookup(token.shape, name)?;
            token = Self {
                declaring,
                name: inner.name,
                offset: token.offset + inner.offset,
                shape: inner.shape,
            };
        }
        Some(token)
    }

    pub fn declaring_shape(&self) -> &'static Shape {
        self.declaring
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Byte offset from the start of the declaring value.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn shape(&self) -> &'static Shape {
        self.shape
    }
}

impl fmt::Debug for FieldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: {} @ {}",
            self.declaring.type_identifier, self.name, self.shape.type_identifier, self.offset
        )
    }
}

impl PartialEq for FieldToken {
    fn eq(&self, other: &Self) -> bool {
        self.declaring.id == other.declaring.id
            && self.offset == other.offset
            && self.shape.id == other.shape.id
    }
}

impl Eq for FieldToken {}

#[cfg(test)]
mod tests {
    use super::*;
    use facet::Facet;

    #[derive(Facet)]
    struct Inner {
        left: u8,
        right: u64,
    }

    #[derive(Facet)]
    struct Outer {
        tag: u16,
        inner: Inner,
        slots: [u32; 4],
    }

    #[test]
    fn nested_path_sums_offsets() {
        let inner = FieldToken::of::<Outer>("inner").unwrap();
        let right = FieldToken::path(Outer::SHAPE, &["inner", "right"]).unwrap();
        assert_eq!(
            right.offset(),
            inner.offset() + core::mem::offset_of!(Inner, right)
        );
        assert!(right.shape().same_as(u64::SHAPE));
        assert!(right.declaring_shape().same_as(Outer::SHAPE));
        assert_eq!(right.name(), "right");
    }

    #[test]
    fn missing_field_has_no_token() {
        assert!(FieldToken::of::<Outer>("nope").is_none());
        assert!(FieldToken::path(Outer::SHAPE, &["tag", "inner"]).is_none());
        assert!(FieldToken::path(Outer::SHAPE, &[]).is_none());
    }

    #[test]
    fn inline_array_shape_exposes_capacity() {
        let slots = FieldToken::of::<Outer>("slots").unwrap().shape();
        assert_eq!(slots.array_len(), Some(4));
        assert!(slots.array_element().unwrap().same_as(u32::SHAPE));
        assert!(Outer::SHAPE.array_len().is_none());
        assert_eq!(u32::SHAPE.layout().map(|l| l.size()), Some(4));
    }
}
