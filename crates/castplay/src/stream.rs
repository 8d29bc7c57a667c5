//! Lazy, allocation-light sequence transforms.
//!
//! Plain iterator adapters (`map`, `filter`, `flat_map`, `take`, `skip`)
//! already cover stateless reshaping. What they lack is a stateful step that
//! may hold items back and release them when the input ends, which is what
//! frame batching needs. [`Transformer`] and [`SequenceExt::transform`] fill
//! that gap without collecting the input first.
//!
//! # Example
//!
//! ```
//! use castplay::stream::{Emitter, SequenceExt, Transformer};
//!
//! /// Sum runs of equal numbers.
//! #[derive(Default)]
//! struct RunSum(Option<(u32, u32)>);
//!
//! impl Transformer<u32> for RunSum {
//!     type Output = u32;
//!
//!     fn step(&mut self, item: u32, out: &mut Emitter<u32>) {
//!         match self.0 {
//!             Some((value, sum)) if value == item => self.0 = Some((value, sum + item)),
//!             _ => {
//!                 if let Some((_, sum)) = self.0.take() {
//!                     out.emit(sum);
//!                 }
//!                 self.0 = Some((item, item));
//!             }
//!         }
//!     }
//!
//!     fn flush(&mut self, out: &mut Emitter<u32>) {
//!         if let Some((_, sum)) = self.0.take() {
//!             out.emit(sum);
//!         }
//!     }
//! }
//!
//! let sums: Vec<u32> = [1u32, 1, 2, 3, 3, 3].into_iter().transform(RunSum::default()).collect();
//! assert_eq!(sums, vec![2, 2, 9]);
//! ```

use std::collections::VecDeque;
use std::iter::FusedIterator;

/// Output side of a [`Transformer`] step.
#[derive(Debug)]
pub struct Emitter<T> {
    pending: VecDeque<T>,
}

impl<T> Emitter<T> {
    const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Emit one item downstream.
    pub fn emit(&mut self, item: T) {
        self.pending.push_back(item);
    }

    fn pop(&mut self) -> Option<T> {
        self.pending.pop_front()
    }
}

/// A stateful transform step.
pub trait Transformer<In> {
    /// Item type produced.
    type Output;

    /// Consume one input item, emitting zero or more outputs.
    fn step(&mut self, item: In, out: &mut Emitter<Self::Output>);

    /// Called once after the input is exhausted.
    fn flush(&mut self, out: &mut Emitter<Self::Output>) {
        let _ = out;
    }
}

/// Iterator adapter created by [`SequenceExt::transform`].
pub struct Transform<I, T>
where
    I: Iterator,
    T: Transformer<I::Item>,
{
    iter: I,
    transformer: T,
    out: Emitter<T::Output>,
    flushed: bool,
}

impl<I, T> Iterator for Transform<I, T>
where
    I: Iterator,
    T: Transformer<I::Item>,
{
    type Item = T::Output;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.out.pop() {
                return Some(item);
            }
            if self.flushed {
                return None;
            }
            match self.iter.next() {
                Some(item) => self.transformer.step(item, &mut self.out),
                None => {
                    self.transformer.flush(&mut self.out);
                    self.flushed = true;
                }
            }
        }
    }
}

impl<I, T> FusedIterator for Transform<I, T>
where
    I: Iterator,
    T: Transformer<I::Item>,
{
}

/// Extension methods for building lazy pipelines.
pub trait SequenceExt: Iterator + Sized {
    /// Apply a stateful [`Transformer`] lazily.
    fn transform<T>(self, transformer: T) -> Transform<Self, T>
    where
        T: Transformer<Self::Item>,
    {
        Transform {
            iter: self,
            transformer,
            out: Emitter::new(),
            flushed: false,
        }
    }
}

impl<I: Iterator> SequenceExt for I {}
