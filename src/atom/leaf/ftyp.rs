use bon::Builder;

use crate::{atom::FourCC, error::Error, parser::ParseAtom, writer::SerializeAtom};

pub const FTYP: &[u8; 4] = b"ftyp";

/// File Type Atom (ftyp)
/// Identifies the specifications to which this file complies.
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct FileTypeAtom {
    /// Major brand - identifies the 'best use' of the file
    #[builder(into)]
    pub major_brand: FourCC,
    #[builder(default = Default::default())]
    pub minor_version: u32,
    #[builder(default = vec![major_brand], into)]
    pub compatible_brands: Vec<FourCC>,
}

impl Default for FileTypeAtom {
    fn default() -> Self {
        Self {
            major_brand: FourCC(*b"isom"),
            minor_version: 512,
            compatible_brands: vec![
                FourCC(*b"isom"),
                FourCC(*b"iso2"),
                FourCC(*b"avc1"),
                FourCC(*b"mp41"),
            ],
        }
    }
}

impl FileTypeAtom {
    /// Major brand followed by every distinct compatible brand.
    pub fn brands(&self) -> Vec<FourCC> {
        let mut brands = vec![self.major_brand];
        for brand in &self.compatible_brands {
            if !brands.contains(brand) {
                brands.push(*brand);
            }
        }
        brands
    }
}

impl ParseAtom for FileTypeAtom {
    fn parse(atom_type: FourCC, body: &[u8]) -> Result<Self, Error> {
        if atom_type != FTYP {
            return Err(Error::atom_parsing(atom_type, "expected ftyp"));
        }
        parser::parse_ftyp_data(atom_type, body)
    }
}

impl SerializeAtom for FileTypeAtom {
    fn atom_type(&self) -> FourCC {
        FourCC(*FTYP)
    }

    fn into_body_bytes(self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + self.compatible_brands.len() * 4);
        data.extend_from_slice(&self.major_brand.0);
        data.extend_from_slice(&self.minor_version.to_be_bytes());
        for brand in self.compatible_brands {
            data.extend_from_slice(&brand.0);
        }
        data
    }
}

mod parser {
    use winnow::{
        binary::be_u32,
        combinator::{repeat, seq},
        error::StrContext,
        Parser,
    };

    use super::FileTypeAtom;
    use crate::{
        atom::{
            util::parser::{fourcc, parse_fully, Stream},
            FourCC,
        },
        error::Error,
    };

    pub fn parse_ftyp_data(atom_type: FourCC, input: &[u8]) -> Result<FileTypeAtom, Error> {
        parse_fully(atom_type, input, |input: &mut Stream<'_>| {
            seq!(FileTypeAtom {
                major_brand: fourcc.context(StrContext::Label("major_brand")),
                minor_version: be_u32.context(StrContext::Label("minor_version")),
                compatible_brands: repeat(0.., fourcc)
                    .map(|brands: Vec<FourCC>| {
                        brands.into_iter().filter(|b| b.0 != [0u8; 4]).collect()
                    })
                    .context(StrContext::Label("compatible_brands")),
            })
            .parse_next(input)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serialize() {
        let ftyp = FileTypeAtom::builder()
            .major_brand(FourCC(*b"mp42"))
            .compatible_brands(vec![FourCC(*b"mp42"), FourCC(*b"isom")])
            .build();
        let bytes = ftyp.clone().into_body_bytes();
        let parsed = FileTypeAtom::parse(FourCC(*FTYP), &bytes).unwrap();
        assert_eq!(parsed, ftyp);
        assert_eq!(
            parsed.brands(),
            vec![FourCC(*b"mp42"), FourCC(*b"isom")]
        );
    }

    #[test]
    fn test_rejects_ragged_brands() {
        let mut bytes = FileTypeAtom::default().into_body_bytes();
        bytes.push(0);
        assert!(FileTypeAtom::parse(FourCC(*FTYP), &bytes).is_err());
    }
}
