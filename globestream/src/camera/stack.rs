//! Matrix stack.

use crate::math::Matrix;

/// A stack of transforms where operations act on the top entry.
#[derive(Debug, Clone, Default)]
pub struct MatrixStack {
    stack: Vec<Matrix>,
}

impl MatrixStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicates the top entry. Does nothing on an empty stack.
    pub fn push(&mut self) {
        if let Some(top) = self.stack.last().copied() {
            self.stack.push(top);
        }
    }

    pub fn pop(&mut self) -> Option<Matrix> {
        self.stack.pop()
    }

    /// Replaces the top entry, or pushes onto an empty stack.
    pub fn load(&mut self, matrix: Matrix) {
        match self.stack.last_mut() {
            Some(top) => *top = matrix,
            None => self.stack.push(matrix),
        }
    }

    /// Post-multiplies the top entry by `matrix` (`top × matrix`).
    pub fn mult(&mut self, matrix: &Matrix) {
        match self.stack.last_mut() {
            Some(top) => *top = top.multiply(matrix),
            None => self.stack.push(*matrix),
        }
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn current(&self) -> Option<&Matrix> {
        self.stack.last()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
