use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AllocationError;

const SEQUENCE_SPACE: u32 = 0x1_0000;

/// Builds `PREFIX + year + zero-padded student id + disambiguator`.
///
/// The disambiguator is the wall clock in microseconds followed by a
/// per-process sequence seeded from the OS RNG, so two allocations in one
/// process never repeat and separate processes start at unrelated offsets.
/// Uniqueness is still enforced by the store, not here.
#[derive(Debug)]
pub struct CertificateNumberAllocator {
    prefix: String,
    sequence: AtomicU32,
}

impl CertificateNumberAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut seed = [0u8; 4];
        // A fixed start only loses cross-process spread, which the clock covers.
        let start = match getrandom::fill(&mut seed) {
            Ok(()) => u32::from_le_bytes(seed),
            Err(err) => {
                tracing::warn!(error = %err, "OS RNG unavailable, sequence starts at zero");
                0
            }
        };
        Self::with_sequence_start(prefix, start)
    }

    pub fn with_sequence_start(prefix: impl Into<String>, start: u32) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU32::new(start % SEQUENCE_SPACE),
        }
    }

    pub fn allocate(&self, student_id: i64, year: i32) -> Result<String, AllocationError> {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AllocationError::Clock)?
            .as_micros();
        self.allocate_at(student_id, year, micros)
    }

    fn allocate_at(
        &self,
        student_id: i64,
        year: i32,
        micros: u128,
    ) -> Result<String, AllocationError> {
        if student_id < 0 {
            return Err(AllocationError::InvalidStudentId(student_id));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % SEQUENCE_SPACE;
        Ok(format!(
            "{}{year}{student_id:05}{micros:X}{sequence:04X}",
            self.prefix
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_carries_prefix_year_and_padded_student() {
        let allocator = CertificateNumberAllocator::with_sequence_start("CERT", 0);
        let number = allocator.allocate_at(42, 2026, 0xABC).unwrap();
        assert_eq!(number, "CERT202600042ABC0000");
    }

    #[test]
    fn same_instant_allocations_differ() {
        let allocator = CertificateNumberAllocator::with_sequence_start("CERT", 0);
        let first = allocator.allocate_at(42, 2026, 1_000).unwrap();
        let second = allocator.allocate_at(42, 2026, 1_000).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn distinct_students_get_distinct_numbers() {
        let allocator = CertificateNumberAllocator::new("CERT");
        let a = allocator.allocate(1, 2026).unwrap();
        let b = allocator.allocate(2, 2026).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn separate_runs_for_same_student_differ() {
        let first_run = CertificateNumberAllocator::new("CERT");
        let first = first_run.allocate(42, 2026).unwrap();
        let second_run = CertificateNumberAllocator::new("CERT");
        let second = second_run.allocate(42, 2026).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sequence_wraps_within_four_hex_digits() {
        let allocator = CertificateNumberAllocator::with_sequence_start("C", SEQUENCE_SPACE - 1);
        let last = allocator.allocate_at(1, 2026, 1).unwrap();
        let wrapped = allocator.allocate_at(1, 2026, 1).unwrap();
        assert!(last.ends_with("FFFF"));
        assert!(wrapped.ends_with("0000"));
    }

    #[test]
    fn negative_student_id_is_rejected() {
        let allocator = CertificateNumberAllocator::new("CERT");
        assert!(matches!(
            allocator.allocate(-3, 2026),
            Err(AllocationError::InvalidStudentId(-3))
        ));
    }
}
