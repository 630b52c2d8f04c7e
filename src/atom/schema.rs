/*!
 * Static registry of the box types the scanner knows about, their legal nesting levels and their
 * expected children.
 */

use super::FourCC;

/// Bit set of legal nesting levels (bit `n` set means level `n` is legal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels(u8);

impl Levels {
    pub const ANY: Levels = Levels(0xff);

    pub const fn of(levels: &[u8]) -> Self {
        let mut mask = 0u8;
        let mut i = 0;
        while i < levels.len() {
            mask |= 1 << levels[i];
            i += 1;
        }
        Levels(mask)
    }

    pub fn contains(&self, level: u8) -> bool {
        level < 8 && self.0 & (1 << level) != 0
    }
}

#[derive(Debug)]
pub struct BoxDescriptor {
    pub name: FourCC,
    pub levels: Levels,
    pub children: &'static [FourCC],
}

impl BoxDescriptor {
    /// Boxes without expected children are opaque: nothing found inside them is a real box.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

const fn fourcc(name: &[u8; 4]) -> FourCC {
    FourCC::new(name)
}

macro_rules! schema {
    ($($name:literal => $levels:expr, [$($child:literal),*];)*) => {
        /// Sorted by name so lookups can binary search.
        pub const BOXES: &[BoxDescriptor] = &[
            $(BoxDescriptor {
                name: fourcc($name),
                levels: $levels,
                children: &[$(fourcc($child)),*],
            },)*
        ];
    };
}

const ANY: Levels = Levels::ANY;

schema! {
    b"apch" => Levels::of(&[6]), [];
    b"apcs" => Levels::of(&[6]), [];
    b"avc1" => Levels::of(&[6]), [b"avcC", b"colr"];
    b"avcC" => Levels::of(&[7]), [];
    b"blnk" => ANY, [];
    b"bxml" => ANY, [];
    b"chpl" => ANY, [];
    b"clef" => Levels::of(&[3]), [];
    b"clip" => Levels::of(&[1]), [];
    b"cmov" => Levels::of(&[1]), [b"cmvd"];
    b"cmvd" => Levels::of(&[2]), [];
    b"co64" => Levels::of(&[5]), [];
    b"colr" => Levels::of(&[7]), [];
    b"cslg" => ANY, [];
    b"ctab" => Levels::of(&[1]), [];
    b"ctts" => Levels::of(&[5]), [];
    b"dcom" => ANY, [];
    b"dinf" => Levels::of(&[4]), [b"dref"];
    b"dlay" => ANY, [];
    b"dref" => Levels::of(&[5]), [];
    b"drpo" => ANY, [];
    b"drpt" => ANY, [];
    b"edts" => Levels::of(&[2]), [b"elst"];
    b"elst" => Levels::of(&[3]), [];
    b"emsg" => ANY, [];
    b"enof" => Levels::of(&[3]), [];
    b"esds" => Levels::of(&[7]), [];
    b"fiin" => ANY, [];
    b"free" => ANY, [];
    b"ftyp" => Levels::of(&[0]), [];
    b"gmhd" => Levels::of(&[4]), [b"tmcd"];
    b"hclr" => ANY, [];
    b"hdlr" => Levels::of(&[1, 2, 3, 4]), [];
    b"hlit" => ANY, [];
    b"hmhd" => ANY, [];
    b"href" => ANY, [];
    b"hvc1" => Levels::of(&[6]), [b"hvcC", b"pasp"];
    b"hvcC" => Levels::of(&[7]), [];
    b"ilst" => ANY, [];
    b"iods" => Levels::of(&[1]), [];
    b"krok" => ANY, [];
    b"mdat" => Levels::of(&[0]), [];
    b"mdhd" => Levels::of(&[3]), [];
    b"mdia" => Levels::of(&[2]), [b"mdhd", b"hdlr", b"minf"];
    b"mehd" => ANY, [];
    b"meta" => ANY, [b"hdlr"];
    b"mfhd" => ANY, [];
    b"mfra" => ANY, [];
    b"mfro" => ANY, [];
    b"minf" => Levels::of(&[3]), [b"vmhd", b"dinf", b"stbl", b"smhd", b"hdlr", b"gmhd"];
    b"moof" => ANY, [];
    b"moov" => Levels::of(&[0]), [b"udta", b"mvhd", b"trak", b"iods", b"meta", b"clip", b"cmov", b"rmra"];
    b"mp4a" => Levels::of(&[6]), [b"esds"];
    b"mp4v" => Levels::of(&[6]), [b"esds"];
    b"mvex" => ANY, [];
    b"mvhd" => Levels::of(&[1]), [];
    b"nmhd" => Levels::of(&[4]), [];
    b"padb" => ANY, [];
    b"paen" => ANY, [];
    b"pasp" => Levels::of(&[7]), [];
    b"pdin" => ANY, [];
    b"pitm" => ANY, [];
    b"prof" => Levels::of(&[3]), [];
    b"rmda" => Levels::of(&[2]), [];
    b"rmra" => Levels::of(&[1]), [b"rmda"];
    b"sbgp" => Levels::of(&[5]), [];
    b"sdtp" => Levels::of(&[5]), [];
    b"segr" => ANY, [];
    b"sgpd" => Levels::of(&[5]), [];
    b"skip" => ANY, [];
    b"smhd" => Levels::of(&[4]), [];
    b"sowt" => Levels::of(&[6]), [];
    b"stbl" => Levels::of(&[4]), [b"stsd", b"stts", b"stss", b"ctts", b"stsc", b"stsz", b"co64", b"sdtp", b"stco"];
    b"stco" => Levels::of(&[5]), [];
    b"stdp" => ANY, [];
    b"stps" => ANY, [];
    b"stsc" => Levels::of(&[5]), [];
    b"stsd" => Levels::of(&[5]), [b"avc1", b"mp4a", b"tmcd"];
    b"stsh" => ANY, [];
    b"stss" => Levels::of(&[5]), [];
    b"stsz" => Levels::of(&[5]), [];
    b"stts" => Levels::of(&[5]), [];
    b"styl" => ANY, [];
    b"stz2" => ANY, [];
    b"subs" => ANY, [];
    b"tapt" => Levels::of(&[2]), [b"clef", b"prof", b"enof"];
    b"tbox" => ANY, [];
    b"tfhd" => ANY, [];
    b"tfra" => ANY, [];
    b"tkhd" => Levels::of(&[2]), [];
    b"tmcd" => Levels::of(&[3, 4, 5, 6]), [];
    b"traf" => ANY, [];
    b"trak" => Levels::of(&[1]), [b"tkhd", b"edts", b"mdia", b"tref"];
    b"tref" => Levels::of(&[2]), [b"tmcd"];
    b"trex" => ANY, [];
    b"trun" => ANY, [];
    b"twos" => Levels::of(&[6]), [];
    b"twrp" => ANY, [];
    b"udta" => Levels::of(&[1]), [b"meta"];
    b"uuid" => ANY, [];
    b"vmhd" => Levels::of(&[4]), [];
    b"wide" => ANY, [];
}

/// Opaque filler boxes: never have children and may appear at any level.
pub const FILLER: &[FourCC] = &[fourcc(b"free"), fourcc(b"skip"), fourcc(b"wide")];

/// Boxes that may legally appear at the top level of a file.
pub const LEVEL0: &[FourCC] = &[
    fourcc(b"ftyp"),
    fourcc(b"mdat"),
    fourcc(b"meta"),
    fourcc(b"moov"),
    fourcc(b"uuid"),
    fourcc(b"free"),
    fourcc(b"skip"),
    fourcc(b"wide"),
];

/// Boxes that make up the movie header region; used to locate it.
pub const HEADER_NAMES: &[FourCC] = &[
    fourcc(b"apch"),
    fourcc(b"apcs"),
    fourcc(b"avc1"),
    fourcc(b"avcC"),
    fourcc(b"co64"),
    fourcc(b"ctts"),
    fourcc(b"dinf"),
    fourcc(b"dref"),
    fourcc(b"edts"),
    fourcc(b"elst"),
    fourcc(b"esds"),
    fourcc(b"hdlr"),
    fourcc(b"hvc1"),
    fourcc(b"mdhd"),
    fourcc(b"mdia"),
    fourcc(b"minf"),
    fourcc(b"moov"),
    fourcc(b"mp4a"),
    fourcc(b"mp4v"),
    fourcc(b"mvhd"),
    fourcc(b"nmhd"),
    fourcc(b"sdtp"),
    fourcc(b"smhd"),
    fourcc(b"sowt"),
    fourcc(b"stbl"),
    fourcc(b"stco"),
    fourcc(b"stsc"),
    fourcc(b"stsd"),
    fourcc(b"stss"),
    fourcc(b"stsz"),
    fourcc(b"stts"),
    fourcc(b"tkhd"),
    fourcc(b"tmcd"),
    fourcc(b"trak"),
    fourcc(b"tref"),
    fourcc(b"twos"),
    fourcc(b"vmhd"),
];

pub const VIDEO_CODECS: &[FourCC] = &[
    fourcc(b"avc1"),
    fourcc(b"hvc1"),
    fourcc(b"apch"),
    fourcc(b"apcs"),
    fourcc(b"mp4v"),
];

pub const VIDEO_CODEC_EXTENSIONS: &[FourCC] = &[
    fourcc(b"avcC"),
    fourcc(b"hvcC"),
    fourcc(b"pasp"),
    fourcc(b"colr"),
    fourcc(b"esds"),
];

pub const AUDIO_CODECS: &[FourCC] = &[fourcc(b"mp4a"), fourcc(b"twos"), fourcc(b"sowt")];

pub const AUDIO_CODEC_EXTENSIONS: &[FourCC] = &[fourcc(b"esds")];

pub const TIMECODE_CODECS: &[FourCC] = &[fourcc(b"tmcd")];

static FIRST_BYTES: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    while i < BOXES.len() {
        table[BOXES[i].name.0[0] as usize] = true;
        i += 1;
    }
    table
};

/// Looks up the descriptor for a box type.
pub fn lookup(name: &[u8]) -> Option<&'static BoxDescriptor> {
    if name.len() < 4 || !FIRST_BYTES[name[0] as usize] {
        return None;
    }
    BOXES
        .binary_search_by(|descriptor| descriptor.name.0.as_slice().cmp(&name[..4]))
        .ok()
        .map(|index| &BOXES[index])
}

pub fn is_known(name: FourCC) -> bool {
    lookup(&name.0).is_some()
}

pub fn is_leaf(name: FourCC) -> bool {
    lookup(&name.0).is_some_and(BoxDescriptor::is_leaf)
}

pub fn is_filler(name: FourCC) -> bool {
    FILLER.contains(&name)
}

pub fn is_level0(name: FourCC) -> bool {
    lookup(&name.0).is_some_and(|descriptor| descriptor.levels.contains(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxes_sorted() {
        for pair in BOXES.windows(2) {
            assert!(
                pair[0].name.0 < pair[1].name.0,
                "{} must sort before {}",
                pair[0].name,
                pair[1].name
            );
        }
    }

    #[test]
    fn test_first_byte_filter_covers_all_boxes() {
        for descriptor in BOXES {
            assert!(
                FIRST_BYTES[descriptor.name.0[0] as usize],
                "missing first byte for {}",
                descriptor.name
            );
        }
    }

    #[test]
    fn test_lookup() {
        let stbl = lookup(b"stbl").unwrap();
        assert!(stbl.levels.contains(4));
        assert!(!stbl.levels.contains(3));
        assert!(!stbl.is_leaf());
        assert!(lookup(b"zzzz").is_none());
        assert!(is_leaf(FourCC(*b"stco")));
        assert!(is_leaf(FourCC(*b"mdat")));
        assert!(!is_leaf(FourCC(*b"moov")));
        assert!(is_level0(FourCC(*b"free")));
        assert!(!is_level0(FourCC(*b"trak")));
    }

    #[test]
    fn test_levels() {
        let levels = Levels::of(&[1, 2, 3, 4]);
        assert!(levels.contains(1) && levels.contains(4));
        assert!(!levels.contains(0) && !levels.contains(5));
        assert!(Levels::ANY.contains(7));
        assert!(!Levels::ANY.contains(8));
    }
}
