//! Part planning
//!
//! Splits a file length into contiguous, 1-based parts of a fixed size. The
//! last part holds the remainder; an empty file gets a single empty part.

use thiserror::Error;

/// Minimum part size (5MB) - S3 requirement for all but the last part
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum parts allowed in one multipart session
pub const MAX_PARTS: u32 = 10_000;

/// Largest single part (5 GiB), which is also the single PUT limit
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Planning errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Part size must be greater than zero")]
    ZeroPartSize,

    #[error("{len} bytes cannot be split into at most {max_parts} parts")]
    TooManyParts { len: u64, max_parts: u32 },
}

/// One contiguous byte range of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// 1-based part number
    pub index: u32,
    pub offset: u64,
    pub length: u64,
}

/// Ordered parts covering the whole source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    total_len: u64,
    part_size: u64,
    parts: Vec<Part>,
}

impl UploadPlan {
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Effective part size after floor and part-count adjustments
    pub fn part_size(&self) -> u64 {
        self.part_size
    }
}

/// Part planner
#[derive(Debug, Clone)]
pub struct PartPlanner {
    part_size: u64,
    min_part_size: u64,
    max_part_size: u64,
    max_parts: u32,
}

impl PartPlanner {
    /// Create a planner with the S3 part size limits and part-count ceiling
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size,
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
        }
    }

    /// Override the minimum size of non-final parts
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Override the largest allowed part
    pub fn with_max_part_size(mut self, max_part_size: u64) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    /// Override the maximum number of parts
    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = max_parts;
        self
    }

    /// Plan the parts for a source of `len` bytes
    pub fn plan(&self, len: u64) -> Result<UploadPlan, PlanError> {
        let part_size = self.effective_part_size(len)?;

        if len == 0 {
            return Ok(UploadPlan {
                total_len: 0,
                part_size,
                parts: vec![Part {
                    index: 1,
                    offset: 0,
                    length: 0,
                }],
            });
        }

        let parts = (0..len.div_ceil(part_size))
            .map(|i| {
                let offset = i * part_size;
                Part {
                    // bounded by max_parts
                    index: (i + 1) as u32,
                    offset,
                    length: part_size.min(len - offset),
                }
            })
            .collect();

        Ok(UploadPlan {
            total_len: len,
            part_size,
            parts,
        })
    }

    fn effective_part_size(&self, len: u64) -> Result<u64, PlanError> {
        if self.part_size == 0 {
            return Err(PlanError::ZeroPartSize);
        }

        let mut part_size = self.part_size;
        if part_size < self.min_part_size {
            tracing::warn!(
                requested = part_size,
                minimum = self.min_part_size,
                "Part size below service minimum, raising to minimum"
            );
            part_size = self.min_part_size;
        }

        let too_many = PlanError::TooManyParts {
            len,
            max_parts: self.max_parts,
        };
        let max_parts = u64::from(self.max_parts);
        while len.div_ceil(part_size) > max_parts {
            part_size = part_size
                .checked_mul(2)
                .ok_or_else(|| too_many.clone())?;
        }

        // Doubling may overshoot the ceiling while the ceiling itself still fits
        if part_size > self.max_part_size {
            part_size = self.max_part_size;
            if len.div_ceil(part_size) > max_parts {
                return Err(too_many);
            }
        }

        if part_size != self.part_size.max(self.min_part_size) {
            tracing::warn!(
                requested = self.part_size,
                adjusted = part_size,
                max_part_size = self.max_part_size,
                max_parts = self.max_parts,
                "Part size adjusted to stay within the part limits"
            );
        }

        Ok(part_size)
    }
}
