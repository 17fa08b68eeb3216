/// Vertex counts above this need 32-bit indices.
pub const SIXTY_FOUR_KILOBYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexDatatype {
    UnsignedShort,
    UnsignedInt,
}

impl IndexDatatype {
    pub fn for_vertex_count(number_of_vertices: usize) -> Self {
        if number_of_vertices > SIXTY_FOUR_KILOBYTES {
            IndexDatatype::UnsignedInt
        } else {
            IndexDatatype::UnsignedShort
        }
    }

    pub const fn element_size(self) -> usize {
        match self {
            IndexDatatype::UnsignedShort => std::mem::size_of::<u16>(),
            IndexDatatype::UnsignedInt => std::mem::size_of::<u32>(),
        }
    }

    pub const fn format(self) -> wgpu::IndexFormat {
        match self {
            IndexDatatype::UnsignedShort => wgpu::IndexFormat::Uint16,
            IndexDatatype::UnsignedInt => wgpu::IndexFormat::Uint32,
        }
    }

    /// Reads `length` little-endian indices starting at `byte_offset`.
    ///
    /// Panics when the range runs past the end of `data`.
    pub fn decode(self, data: &[u8], byte_offset: usize, length: usize) -> Vec<u32> {
        let byte_length = length
            .checked_mul(self.element_size())
            .and_then(|bytes| bytes.checked_add(byte_offset))
            .unwrap_or_else(|| panic!("index range overflows: offset {byte_offset} length {length}"));
        assert!(
            byte_length <= data.len(),
            "index range {byte_offset}..{byte_length} out of bounds for {} bytes",
            data.len()
        );
        let bytes = &data[byte_offset..byte_length];
        match self {
            IndexDatatype::UnsignedShort => bytes
                .chunks_exact(2)
                .map(|chunk| u32::from(u16::from_le_bytes([chunk[0], chunk[1]])))
                .collect(),
            IndexDatatype::UnsignedInt => bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        }
    }

    /// Packs indices into GPU bytes. Panics when a 16-bit index does not fit.
    pub fn encode(self, indices: &[u32]) -> Vec<u8> {
        match self {
            IndexDatatype::UnsignedShort => {
                let narrowed: Vec<u16> = indices
                    .iter()
                    .map(|&index| {
                        u16::try_from(index)
                            .unwrap_or_else(|_| panic!("index {index} does not fit 16-bit indices"))
                    })
                    .collect();
                bytemuck::cast_slice(&narrowed).to_vec()
            }
            IndexDatatype::UnsignedInt => bytemuck::cast_slice(indices).to_vec(),
        }
    }
}

/// Decodes indices whose width follows from the mesh's vertex count.
pub fn create_integer_index_array(
    data: &[u8],
    number_of_vertices: usize,
    byte_offset: usize,
    length: usize,
) -> Vec<u32> {
    IndexDatatype::for_vertex_count(number_of_vertices).decode(data, byte_offset, length)
}
