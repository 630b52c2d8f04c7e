/*!
 * Turns raw scanner hits into a consistent atom tree: implausible and spurious detections are
 * dropped, the header region is located, and every atom gets a parent and a nesting level.
 */

use tracing::debug;

use crate::{
    atom::{schema, util::median, Atom, AtomId, Atoms, FourCC},
    config::Config,
    diagnostics::{Diagnostics, Stage},
    error::{Error, ErrorKind, Result},
    scanner::ScanResult,
};

const MOOV: FourCC = FourCC::new(b"moov");
const MDAT: FourCC = FourCC::new(b"mdat");

/// Boxes other than the media-data box must be smaller than this.
pub const MAX_ATOM_SIZE: u64 = 1024 * 1024;
/// Bytes the media-data box must leave outside itself.
pub const MDAT_SLACK: u64 = 1024;

/// Byte region estimated to hold the movie header tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSpot {
    pub center: u64,
    pub begin: u64,
    pub end: u64,
    pub count: usize,
}

/// Validated atoms plus what was learned about the header region.
#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub atoms: Atoms,
    pub spot: Option<HeaderSpot>,
}

pub fn validate(
    scan: ScanResult,
    file_size: u64,
    config: &Config,
    diagnostics: &mut Diagnostics,
) -> Result<Validated> {
    let mut atoms = scan.atoms;
    atoms.sort_by_key(|atom| atom.offset);

    let found = atoms.len();
    atoms.retain(|atom| is_plausible(atom, file_size));
    let plausible = atoms.len();
    let mut atoms = remove_nested_in_leaves(atoms);
    debug!(
        found,
        plausible,
        kept = atoms.len(),
        "filtered scanner hits"
    );

    if atoms.is_empty() {
        diagnostics.report(Stage::Validator, config, Error::new(ErrorKind::NoAtoms))?;
        return Ok(Validated::default());
    }

    let mut atoms = Atoms::from_sorted(atoms);
    let spot = resolve_header_spot(&mut atoms, config.header_margin);
    if spot.is_none() {
        diagnostics.report(Stage::Validator, config, Error::new(ErrorKind::HeaderNotFound))?;
    }

    assign_levels(&mut atoms, diagnostics);
    check_links(&mut atoms, file_size, diagnostics);

    Ok(Validated { atoms, spot })
}

fn is_plausible(atom: &Atom, file_size: u64) -> bool {
    if atom.atom_type == MDAT {
        atom.size > file_size / 2 && atom.size < file_size.saturating_sub(MDAT_SLACK)
    } else {
        atom.size < MAX_ATOM_SIZE
    }
}

/// Removes every detection that lies entirely inside the payload of a box that has no children.
fn remove_nested_in_leaves(atoms: Vec<Atom>) -> Vec<Atom> {
    let mut removed = vec![false; atoms.len()];
    for (i, leaf) in atoms.iter().enumerate() {
        if removed[i] || !(schema::is_leaf(leaf.atom_type) || schema::is_filler(leaf.atom_type)) {
            continue;
        }
        for (j, other) in atoms.iter().enumerate().skip(i + 1) {
            if other.offset >= leaf.next() {
                break;
            }
            if leaf.contains(other) {
                removed[j] = true;
            }
        }
    }
    atoms
        .into_iter()
        .zip(removed)
        .filter_map(|(atom, removed)| (!removed).then_some(atom))
        .collect()
}

/// Locates the header region, synthesizes a `moov` when none survived, and drops header atoms
/// found far away from it.
fn resolve_header_spot(atoms: &mut Atoms, margin: u64) -> Option<HeaderSpot> {
    let header: Vec<&Atom> = atoms
        .iter()
        .filter(|atom| schema::HEADER_NAMES.contains(&atom.atom_type))
        .collect();
    if header.is_empty() {
        return None;
    }

    let center = median(header.iter().map(|atom| atom.offset)).unwrap_or_default();
    let mut spot = HeaderSpot {
        center: center as u64,
        begin: header.iter().map(|atom| atom.offset).min().unwrap_or_default(),
        end: header.iter().map(|atom| atom.next()).max().unwrap_or_default(),
        count: header.len(),
    };

    let begin_index = atoms.at_offset(spot.begin).map(AtomId::index);
    let begins_with_moov = begin_index
        .and_then(|index| atoms.get(AtomId(index)))
        .is_some_and(|atom| atom.atom_type == MOOV);
    if !begins_with_moov {
        if let Some(index) = begin_index {
            let boundary = atoms[..index]
                .iter()
                .rev()
                .find(|atom| schema::is_level0(atom.atom_type));
            if let Some(boundary) = boundary {
                spot.begin = boundary.next();
            }
        }
        if atoms.first_of(b"moov").is_none() && spot.end > spot.begin {
            let mut moov = Atom::new(MOOV, spot.begin, spot.end - spot.begin, 8);
            moov.synthetic = true;
            debug!(offset = moov.offset, size = moov.size, "synthesized moov");
            atoms.insert(moov);
        }
    }

    let low = spot.begin.saturating_sub(margin);
    let high = spot.end.saturating_add(margin);
    atoms.retain(|atom| {
        atom.synthetic
            || !schema::HEADER_NAMES.contains(&atom.atom_type)
            || (atom.offset >= low && atom.offset < high)
    });

    debug!(?spot, "header spot");
    Some(spot)
}

/// Assigns parents and levels by containment and flags atoms at a level their schema entry forbids.
fn assign_levels(atoms: &mut Atoms, diagnostics: &mut Diagnostics) {
    let mut stack: Vec<AtomId> = Vec::new();
    let ids: Vec<AtomId> = atoms.ids().collect();
    for id in ids {
        let Some(atom) = atoms.get(id) else { continue };
        while let Some(top) = stack.last().and_then(|top| atoms.get(*top)) {
            if top.contains(atom) {
                break;
            }
            stack.pop();
        }
        let parent = stack.last().copied();
        let level = parent
            .and_then(|parent| atoms.get(parent))
            .and_then(|parent| parent.level)
            .map_or(0, |level| level.saturating_add(1));
        let descriptor = schema::lookup(&atom.atom_type.0);
        let misplaced = descriptor.is_some_and(|d| !d.levels.contains(level));
        let is_container = descriptor.is_some_and(|d| !d.is_leaf());

        if misplaced {
            diagnostics.push(
                Stage::Validator,
                ErrorKind::InvalidLevel,
                format!(
                    "{} at offset {} sits at level {level}",
                    atom.atom_type, atom.offset
                ),
            );
        }
        if let Some(atom) = atoms.get_mut(id) {
            atom.parent = parent;
            atom.level = Some(level);
            atom.misplaced = misplaced;
        }
        if is_container {
            stack.push(id);
        }
    }
}

/// Checks that every atom is followed by another atom or the end of the file.
fn check_links(atoms: &mut Atoms, file_size: u64, diagnostics: &mut Diagnostics) {
    let mut dangling = Vec::new();
    for atom in atoms.iter() {
        let next = atom.next();
        if next != file_size && atoms.at_offset(next).is_none() {
            dangling.push(format!(
                "{} at offset {} points to {next}",
                atom.atom_type, atom.offset
            ));
        }
    }
    for message in dangling {
        diagnostics.push(Stage::Validator, ErrorKind::NextAtomNotFound, message);
    }
    for atom in atoms.iter_mut() {
        atom.last = atom.level == Some(0) && atom.next() == file_size;
    }
}
