//! Native size and alignment of encoded types

use crate::metadata::{FormatError, MetaHeap, Record, RecordKind, StructMeta, TypeEncoding, TypeKind, MAX_NESTING};

/// Size and alignment of a native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Size in bytes
    pub size: usize,
    /// Alignment in bytes (power of two, at least 1)
    pub align: usize,
}

impl Layout {
    /// Layout of a scalar whose alignment equals its size
    pub const fn scalar(size: usize) -> Self {
        Self { size, align: size }
    }

    /// Zero-sized
    pub const VOID: Layout = Layout { size: 0, align: 1 };

    /// Native pointer
    pub const POINTER: Layout = Layout::scalar(8);
}

/// Largest native value, in bytes, that layouts may describe.
pub const MAX_VALUE_SIZE: usize = 1 << 24;

/// Round `offset` up to a multiple of `align`.
pub fn align_up(offset: usize, align: usize) -> usize {
    let align = align.max(1);
    (offset + align - 1) / align * align
}

/// One field of a [`StructLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Byte offset within the struct
    pub offset: usize,
    /// Field layout
    pub layout: Layout,
}

/// Computed C layout of a struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Fields in declaration order
    pub fields: Vec<FieldLayout>,
    /// Total size, padded to the alignment
    pub size: usize,
    /// Alignment of the most-aligned field
    pub align: usize,
}

impl StructLayout {
    /// Lay out `(name, layout)` fields with natural alignment.
    pub fn compute<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Layout)>,
        S: Into<String>,
    {
        let mut offset = 0;
        let mut align = 1;
        let mut out = Vec::new();
        for (name, layout) in fields {
            offset = align_up(offset, layout.align);
            out.push(FieldLayout {
                name: name.into(),
                offset,
                layout,
            });
            offset += layout.size;
            align = align.max(layout.align);
        }
        Self {
            fields: out,
            size: align_up(offset, align),
            align,
        }
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// As a plain layout
    pub fn layout(&self) -> Layout {
        Layout {
            size: self.size,
            align: self.align,
        }
    }
}

/// Layout of an encoded type.
pub fn layout_of(heap: &MetaHeap, encoding: &TypeEncoding<'_>) -> Result<Layout, FormatError> {
    layout_at(heap, encoding, 0)
}

fn layout_at(heap: &MetaHeap, encoding: &TypeEncoding<'_>, depth: usize) -> Result<Layout, FormatError> {
    if depth > MAX_NESTING {
        return Err(FormatError::NestingTooDeep {
            offset: encoding.offset(),
        });
    }
    Ok(match encoding.kind() {
        TypeKind::Void => Layout::VOID,
        TypeKind::Bool | TypeKind::Char | TypeKind::UChar => Layout::scalar(1),
        TypeKind::Short | TypeKind::UShort => Layout::scalar(2),
        TypeKind::Int | TypeKind::UInt | TypeKind::Float => Layout::scalar(4),
        TypeKind::Long | TypeKind::ULong | TypeKind::LongLong | TypeKind::ULongLong | TypeKind::Double => {
            Layout::scalar(8)
        }
        TypeKind::CString
        | TypeKind::Selector
        | TypeKind::Class
        | TypeKind::InstanceType
        | TypeKind::Id
        | TypeKind::InterfaceRef
        | TypeKind::Pointer
        | TypeKind::FunctionPointer
        | TypeKind::Block
        | TypeKind::IncompleteArray => Layout::POINTER,
        TypeKind::ConstantArray => {
            let len = encoding.array_len()?.unwrap_or(0) as usize;
            let inner = match encoding.inner()? {
                Some(inner) => layout_at(heap, &inner, depth + 1)?,
                None => Layout::VOID,
            };
            let size = inner
                .size
                .checked_mul(len)
                .filter(|size| *size <= MAX_VALUE_SIZE)
                .ok_or(FormatError::ValueTooLarge {
                    offset: encoding.offset(),
                    limit: MAX_VALUE_SIZE,
                })?;
            Layout {
                size,
                align: inner.align,
            }
        }
        TypeKind::StructRef => {
            let record = struct_named(heap, encoding)?;
            struct_layout_at(heap, &record, depth + 1)?.layout()
        }
    })
}

/// Struct record referenced by a struct-ref encoding.
pub fn struct_named<'h>(heap: &'h MetaHeap, encoding: &TypeEncoding<'h>) -> Result<StructMeta<'h>, FormatError> {
    let name = encoding.name()?.unwrap_or_default();
    let record: Option<Record<'h>> = heap.js_table().find(name, false)?;
    match record {
        Some(record) if record.kind()? == RecordKind::Struct => StructMeta::try_from(record),
        _ => Err(FormatError::UnknownStruct(name.to_string())),
    }
}

/// Layout of a struct record.
pub fn struct_layout(heap: &MetaHeap, record: &StructMeta<'_>) -> Result<StructLayout, FormatError> {
    struct_layout_at(heap, record, 0)
}

fn struct_layout_at(heap: &MetaHeap, record: &StructMeta<'_>, depth: usize) -> Result<StructLayout, FormatError> {
    let mut fields = Vec::new();
    for (name, encoding) in record.fields()? {
        fields.push((name, layout_at(heap, &encoding, depth)?));
    }
    // Each field is capped, so the running offset cannot overflow
    let layout = StructLayout::compute(fields);
    if layout.size > MAX_VALUE_SIZE {
        return Err(FormatError::ValueTooLarge {
            offset: record.offset(),
            limit: MAX_VALUE_SIZE,
        });
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CatalogWriter, EncodingList, HeapView, Header, Names, StructDecl, TypeDecl};

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(5, 1), 5);
    }

    #[test]
    fn test_struct_layout_padding() {
        let layout = StructLayout::compute(vec![
            ("flag", Layout::scalar(1)),
            ("value", Layout::scalar(8)),
            ("small", Layout::scalar(2)),
        ]);
        let offsets: Vec<_> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
        assert_eq!(layout.align, 8);
        assert_eq!(layout.field("small").unwrap().offset, 16);
    }

    #[test]
    fn test_empty_struct() {
        let layout = StructLayout::compute(Vec::<(&str, Layout)>::new());
        assert_eq!(layout.size, 0);
        assert_eq!(layout.align, 1);
    }

    #[test]
    fn test_nested_struct_and_arrays() {
        let mut w = CatalogWriter::new();
        w.structure(StructDecl::new(
            Header::new(Names::js("CGPoint")),
            vec![("x", TypeDecl::Double), ("y", TypeDecl::Double)],
        ));
        w.structure(StructDecl::new(
            Header::new(Names::js("Tagged")),
            vec![
                ("tag", TypeDecl::Char),
                ("origin", TypeDecl::Struct("CGPoint".into())),
                ("bytes", TypeDecl::ConstantArray(3, Box::new(TypeDecl::UShort))),
            ],
        ));
        let heap = MetaHeap::load(w.finish()).unwrap();
        let tagged: StructMeta<'_> = heap.js_table().find("Tagged", true).unwrap().unwrap().try_into().unwrap();
        let layout = struct_layout(&heap, &tagged).unwrap();
        let offsets: Vec<_> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 24]);
        assert_eq!(layout.fields[2].layout, Layout { size: 6, align: 2 });
        assert_eq!(layout.size, 32);
    }

    #[test]
    fn test_unknown_struct_ref() {
        let mut w = CatalogWriter::new();
        let at = w.encoding_list(&[TypeDecl::Struct("Missing".into())]);
        let heap = MetaHeap::load(w.finish()).unwrap();
        let node = EncodingList::view(&heap, at).unwrap().get(0).unwrap().unwrap();
        assert_eq!(
            layout_of(&heap, &node),
            Err(FormatError::UnknownStruct("Missing".into()))
        );
    }

    #[test]
    fn test_oversized_arrays_are_rejected() {
        let mut w = CatalogWriter::new();
        let nested = TypeDecl::ConstantArray(
            4,
            Box::new(TypeDecl::ConstantArray(
                1 << 31,
                Box::new(TypeDecl::ConstantArray(1 << 31, Box::new(TypeDecl::Char))),
            )),
        );
        let wide = TypeDecl::ConstantArray(u32::MAX, Box::new(TypeDecl::Double));
        let at = w.encoding_list(&[nested, wide]);
        w.structure(StructDecl::new(
            Header::new(Names::js("Wide")),
            vec![
                ("a", TypeDecl::ConstantArray(MAX_VALUE_SIZE as u32, Box::new(TypeDecl::Char))),
                ("b", TypeDecl::Char),
            ],
        ));
        let heap = MetaHeap::load(w.finish()).unwrap();
        let list = EncodingList::view(&heap, at).unwrap();
        for i in 0..2 {
            let node = list.get(i).unwrap().unwrap();
            assert!(matches!(
                layout_of(&heap, &node),
                Err(FormatError::ValueTooLarge { .. })
            ));
        }
        let wide: StructMeta<'_> = heap.js_table().find("Wide", true).unwrap().unwrap().try_into().unwrap();
        assert!(matches!(
            struct_layout(&heap, &wide),
            Err(FormatError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_self_containing_struct_is_rejected() {
        let mut w = CatalogWriter::new();
        w.structure(StructDecl::new(
            Header::new(Names::js("Loop")),
            vec![("next", TypeDecl::Struct("Loop".into()))],
        ));
        let heap = MetaHeap::load(w.finish()).unwrap();
        let record: StructMeta<'_> = heap.js_table().find("Loop", true).unwrap().unwrap().try_into().unwrap();
        assert!(matches!(
            struct_layout(&heap, &record),
            Err(FormatError::NestingTooDeep { .. })
        ));
    }
}
