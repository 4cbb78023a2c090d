//! Arena storage for live elements.
//!
//! The tree owns every [`Element`] in a sparse-set arena:
//!
//! - **Generational indices**: [`ElementId`] carries index + generation so
//!   a stale id to a retired slot fails lookup instead of aliasing.
//! - **Dense storage**: elements are stored contiguously; lookup goes
//!   through a sparse map validated against the generation.
//! - **Swap-remove retirement**: disposal removes a slot in O(1) without
//!   leaving holes in dense storage.
//!
//! Disposal is modeled as slot retirement: there is no pointer nulling to
//! break cycles, the id simply stops resolving.

use std::rc::Rc;

use crate::element::{Element, ElementBody, ElementId};
use crate::widget::Widget;

struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

struct Slot {
    element: Element,
    /// Back-pointer into the sparse array, for swap-remove fixup.
    sparse_index: u32,
}

/// Central arena of live elements.
pub struct ElementTree {
    dense: Vec<Slot>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    retired_generations: Vec<u32>,
}

impl ElementTree {
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            retired_generations: Vec::new(),
        }
    }

    /// Insert a freshly inflated element and wire it under `parent`.
    ///
    /// Depth is derived from the parent (`parent.depth + 1`, 0 at root).
    pub fn insert(
        &mut self,
        widget: Rc<dyn Widget>,
        body: ElementBody,
        parent: Option<ElementId>,
    ) -> ElementId {
        let (sparse_index, generation) = if let Some(index) = self.free_indices.pop() {
            let generation = self.retired_generations[index as usize].wrapping_add(1);
            self.retired_generations[index as usize] = generation;
            (index, generation)
        } else {
            let index = self.sparse.len() as u32;
            self.sparse.push(None);
            self.retired_generations.push(0);
            (index, 0)
        };

        let id = ElementId::new(sparse_index, generation);
        let depth = parent
            .and_then(|p| self.get(p))
            .map(|p| p.depth() + 1)
            .unwrap_or(0);

        let dense_index = self.dense.len();
        self.dense.push(Slot {
            element: Element::new(id, widget, body, parent, depth),
            sparse_index,
        });
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });

        if let Some(parent_id) = parent {
            if let Some(parent_el) = self.get_mut(parent_id) {
                parent_el.children_mut().push(id);
            }
        }

        id
    }

    /// Retire an element's slot. The element is dropped; its id goes stale.
    ///
    /// The caller is responsible for unlinking and retiring children first;
    /// this only detaches the element from its parent's child list.
    pub fn retire(&mut self, id: ElementId) {
        let Some(dense_index) = self.dense_index(id) else {
            return;
        };

        if let Some(parent_id) = self.dense[dense_index].element.parent() {
            if let Some(parent_dense) = self.dense_index(parent_id) {
                self.dense[parent_dense]
                    .element
                    .children_mut()
                    .retain(|&c| c != id);
            }
        }

        let last_dense_index = self.dense.len() - 1;
        let removed = self.dense.swap_remove(dense_index);

        // Fix up the sparse entry of the slot that moved into this position.
        if dense_index != last_dense_index {
            let moved_sparse = self.dense[dense_index].sparse_index;
            if let Some(entry) = self.sparse[moved_sparse as usize].as_mut() {
                entry.dense_index = dense_index;
            }
        }

        self.sparse[id.index as usize] = None;
        self.free_indices.push(id.index);
        drop(removed);
    }

    fn dense_index(&self, id: ElementId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|entry| entry.as_ref())
            .filter(|entry| entry.generation == id.generation)
            .map(|entry| entry.dense_index)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.dense_index(id).is_some()
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.dense_index(id).map(|index| &self.dense[index].element)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.dense_index(id)
            .map(|index| &mut self.dense[index].element)
    }

    /// Iterate ancestor ids, nearest first, following the parent chain.
    pub fn ancestors(&self, id: ElementId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).and_then(|el| el.parent()),
        }
    }

    /// Collect `id` and every descendant, parents before children.
    pub fn collect_subtree(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(element) = self.get(current) else {
                continue;
            };
            out.push(current);
            for &child in element.children().iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn clear(&mut self) {
        self.dense.clear();
        self.sparse.clear();
        self.free_indices.clear();
        self.retired_generations.clear();
    }
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over an element's ancestor chain, nearest first.
pub struct Ancestors<'a> {
    tree: &'a ElementTree,
    next: Option<ElementId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ElementId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.get(current).and_then(|el| el.parent());
        Some(current)
    }
}
