//! Template selection by requested size

use localdriver_core::props::HostSize;
use localdriver_core::{Error, HostTemplate, Result, SizingRequirements};

/// Dominant Resource Fairness weight of a core
pub const CORE_DRF_WEIGHT: f32 = 1.0;

/// Dominant Resource Fairness weight of 1 GB of RAM
pub const RAM_DRF_WEIGHT: f32 = 1.0 / 8.0;

/// Dominant Resource Fairness weight of 1 GB of disk
pub const DISK_DRF_WEIGHT: f32 = 1.0 / 16.0;

/// Dominant Resource Fairness rank of a size, lower is cheaper
pub fn rank_drf(size: &HostSize) -> f32 {
    size.cores as f32 * CORE_DRF_WEIGHT
        + size.ram_size * RAM_DRF_WEIGHT
        + size.disk_size as f32 * DISK_DRF_WEIGHT
}

/// Whether a template satisfies the requirements
///
/// A template with a disk size of 0 leaves the disk unconstrained.
pub fn satisfies(size: &HostSize, sizing: &SizingRequirements) -> bool {
    size.cores >= sizing.min_cores
        && size.ram_size >= sizing.min_ram_size
        && (size.disk_size == 0 || size.disk_size >= sizing.min_disk_size)
        && size.gpu_number >= sizing.min_gpu
}

/// Pick the cheapest template satisfying the requirements
///
/// Among templates of equal rank the first one listed wins.
pub fn select_template_by_size(
    sizing: &SizingRequirements,
    templates: &[HostTemplate],
) -> Result<HostTemplate> {
    templates
        .iter()
        .filter(|t| satisfies(&t.size, sizing))
        .min_by(|a, b| rank_drf(&a.size).total_cmp(&rank_drf(&b.size)))
        .cloned()
        .ok_or(Error::NoTemplateMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn template(id: &str, cores: u32, ram_size: f32, disk_size: u32) -> HostTemplate {
        HostTemplate {
            id: id.to_string(),
            name: id.to_string(),
            size: HostSize {
                cores,
                ram_size,
                disk_size,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_rank() {
        assert_eq!(rank_drf(&template("a", 2, 8.0, 32).size), 2.0 + 1.0 + 2.0);
    }

    #[test]
    fn test_selects_cheapest_match() {
        let templates = vec![
            template("large", 8, 32.0, 100),
            template("small", 1, 1.0, 10),
            template("medium", 2, 4.0, 20),
        ];
        let sizing = SizingRequirements {
            min_cores: 2,
            min_ram_size: 2.0,
            min_disk_size: 16,
            ..Default::default()
        };
        assert_eq!(select_template_by_size(&sizing, &templates).unwrap().id, "medium");
    }

    #[test]
    fn test_zero_disk_is_unconstrained() {
        let templates = vec![template("nodisk", 1, 1.0, 0), template("disk", 1, 1.0, 50)];
        let sizing = SizingRequirements {
            min_cores: 1,
            min_ram_size: 1.0,
            min_disk_size: 40,
            ..Default::default()
        };
        assert_eq!(select_template_by_size(&sizing, &templates).unwrap().id, "nodisk");
    }

    #[test]
    fn test_gpu_requirement() {
        let mut gpu = template("gpu", 4, 16.0, 0);
        gpu.size.gpu_number = 1;
        let templates = vec![template("cpu", 1, 1.0, 0), gpu];
        let sizing = SizingRequirements {
            min_gpu: 1,
            ..Default::default()
        };
        assert_eq!(select_template_by_size(&sizing, &templates).unwrap().id, "gpu");
    }

    #[test]
    fn test_no_match() {
        let sizing = SizingRequirements {
            min_cores: 64,
            ..Default::default()
        };
        assert!(matches!(
            select_template_by_size(&sizing, &[template("small", 1, 1.0, 10)]),
            Err(Error::NoTemplateMatch)
        ));
    }

    proptest! {
        #[test]
        fn prop_selection_is_minimal(
            specs in proptest::collection::vec((1u32..16, 1u32..64, 0u32..200), 1..12),
            min_cores in 0u32..8,
            min_ram in 0u32..32,
        ) {
            let templates: Vec<HostTemplate> = specs
                .iter()
                .enumerate()
                .map(|(i, (c, r, d))| template(&format!("t{}", i), *c, *r as f32, *d))
                .collect();
            let sizing = SizingRequirements {
                min_cores,
                min_ram_size: min_ram as f32,
                ..Default::default()
            };

            match select_template_by_size(&sizing, &templates) {
                Ok(selected) => {
                    prop_assert!(satisfies(&selected.size, &sizing));
                    for t in templates.iter().filter(|t| satisfies(&t.size, &sizing)) {
                        prop_assert!(rank_drf(&selected.size) <= rank_drf(&t.size));
                    }
                }
                Err(_) => {
                    prop_assert!(templates.iter().all(|t| !satisfies(&t.size, &sizing)));
                }
            }
        }
    }
}
