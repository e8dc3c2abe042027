//! Types pour les adresses mémoire
//!
//! Distinct newtypes for physical and virtual addresses so a physical pool
//! can never hand out addresses to a virtual-range tracker by mistake.

use super::{MemoryError, MemoryResult, PAGE_SIZE};
use core::fmt;
use core::ops::{Add, Sub};

/// Address kinds an `AddressRangePool` can manage
pub trait PageAddress: Copy + Ord + fmt::Debug {
    fn new(addr: usize) -> Self;
    fn value(self) -> usize;

    /// Vérifie si l'adresse est alignée sur une page
    fn is_page_aligned(self) -> bool {
        self.value() % PAGE_SIZE == 0
    }

    /// Address `pages` pages above this one, `None` on overflow
    fn checked_add_pages(self, pages: usize) -> Option<Self> {
        pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| self.value().checked_add(bytes))
            .map(Self::new)
    }

    /// Parse a raw value, rejecting unaligned input
    fn aligned(addr: usize) -> MemoryResult<Self> {
        let addr = Self::new(addr);
        if addr.is_page_aligned() {
            Ok(addr)
        } else {
            Err(MemoryError::AlignmentError)
        }
    }
}

macro_rules! page_address {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Retourne la valeur brute de l'adresse
            pub const fn value(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl PageAddress for $name {
            fn new(addr: usize) -> Self {
                Self(addr)
            }

            fn value(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, concat!($tag, "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }
    };
}

page_address!(
    /// Représente une adresse physique
    PhysicalAddress,
    "PhysAddr"
);

page_address!(
    /// Représente une adresse virtuelle
    VirtualAddress,
    "VirtAddr"
);
