//! Nested view of the validated atom list, built from its parent links.

use std::fmt::{self, Write};

use crate::atom::{Atom, AtomId, Atoms, FourCC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomNode {
    pub id: AtomId,
    pub atom_type: FourCC,
    pub offset: u64,
    pub size: u64,
    pub level: Option<u8>,
    pub broken: bool,
    pub misplaced: bool,
    pub synthetic: bool,
    pub children: Vec<AtomNode>,
}

impl AtomNode {
    fn build(atoms: &Atoms, id: AtomId, atom: &Atom) -> Self {
        AtomNode {
            id,
            atom_type: atom.atom_type,
            offset: atom.offset,
            size: atom.size,
            level: atom.level,
            broken: atom.broken,
            misplaced: atom.misplaced,
            synthetic: atom.synthetic,
            children: atoms
                .children(id)
                .map(|(child_id, child)| AtomNode::build(atoms, child_id, child))
                .collect(),
        }
    }

    /// Number of nodes in this subtree, itself included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(AtomNode::count).sum::<usize>()
    }

    fn write(&self, out: &mut impl Write, depth: usize) -> fmt::Result {
        write!(
            out,
            "{:indent$}{} @{} size={}",
            "",
            self.atom_type,
            self.offset,
            self.size,
            indent = depth * 2
        )?;
        if let Some(level) = self.level {
            write!(out, " level={level}")?;
        }
        if self.misplaced {
            out.write_str(" [invalid level]")?;
        }
        if self.synthetic {
            out.write_str(" [synthetic]")?;
        }
        if self.broken {
            out.write_str(" [broken]")?;
        }
        out.write_char('\n')?;
        for child in &self.children {
            child.write(out, depth + 1)?;
        }
        Ok(())
    }
}

/// Top-level atoms with their descendants, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomTree {
    pub roots: Vec<AtomNode>,
}

impl AtomTree {
    pub fn new(atoms: &Atoms) -> Self {
        let roots = atoms
            .ids()
            .filter_map(|id| atoms.get(id).map(|atom| (id, atom)))
            .filter(|(_, atom)| atom.parent.is_none())
            .map(|(id, atom)| AtomNode::build(atoms, id, atom))
            .collect();
        AtomTree { roots }
    }

    pub fn len(&self) -> usize {
        self.roots.iter().map(AtomNode::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl fmt::Display for AtomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for root in &self.roots {
            root.write(f, 0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_from_parent_links() {
        let mut moov = Atom::new(FourCC(*b"moov"), 16, 100, 8);
        moov.level = Some(0);
        let mut mvhd = Atom::new(FourCC(*b"mvhd"), 24, 20, 8);
        mvhd.level = Some(1);
        mvhd.parent = Some(AtomId(1));
        let mut trak = Atom::new(FourCC(*b"trak"), 44, 72, 8);
        trak.level = Some(1);
        trak.parent = Some(AtomId(1));
        let mut tkhd = Atom::new(FourCC(*b"tkhd"), 52, 64, 8);
        tkhd.level = Some(3);
        tkhd.misplaced = true;
        tkhd.parent = Some(AtomId(3));
        let atoms = Atoms::from_sorted(vec![
            Atom::new(FourCC(*b"ftyp"), 0, 16, 8),
            moov,
            mvhd,
            trak,
            tkhd,
        ]);

        let tree = AtomTree::new(&atoms);
        assert_eq!(tree.roots.len(), 2);
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.roots[1].children[1].children[0].atom_type, FourCC(*b"tkhd"));
        assert_eq!(
            tree.to_string(),
            "ftyp @0 size=16\n\
             moov @16 size=100 level=0\n  \
             mvhd @24 size=20 level=1\n  \
             trak @44 size=72 level=1\n    \
             tkhd @52 size=64 level=3 [invalid level]\n"
        );
    }
}
