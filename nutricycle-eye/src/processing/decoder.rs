//! Raw detector output -> Detection list

use crate::error::VisionError;
use crate::processing::letterbox::Letterbox;
use nutricycle_core::{ClassTable, Detection};

/// Memory order of a `[proposals x (4 + classes)]` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[N, 4 + C]`: each proposal is contiguous
    ProposalMajor,
    /// `[4 + C, N]`: each channel is contiguous (YOLOv8 export layout)
    ChannelMajor,
}

/// Detector output in model input space. Channels 0..4 are cx, cy, w, h;
/// the rest are per-class scores.
#[derive(Debug, Clone)]
pub struct RawTensor {
    pub data: Vec<f32>,
    pub proposals: usize,
    pub channels: usize,
    pub layout: TensorLayout,
}

impl RawTensor {
    pub fn new(
        data: Vec<f32>,
        proposals: usize,
        channels: usize,
        layout: TensorLayout,
    ) -> Result<Self, VisionError> {
        if channels < 5 {
            return Err(VisionError::Processing(format!(
                "Detector output needs at least 5 channels, got {}",
                channels
            )));
        }
        let expected = proposals
            .checked_mul(channels)
            .ok_or_else(|| VisionError::Processing("Tensor shape overflow".to_string()))?;
        if data.len() != expected {
            return Err(VisionError::Processing(format!(
                "Tensor holds {} values, shape {}x{} needs {}",
                data.len(),
                proposals,
                channels,
                expected
            )));
        }
        Ok(Self {
            data,
            proposals,
            channels,
            layout,
        })
    }

    /// Value of `channel` for `proposal`.
    #[inline]
    pub fn at(&self, proposal: usize, channel: usize) -> f32 {
        match self.layout {
            TensorLayout::ProposalMajor => self.data[proposal * self.channels + channel],
            TensorLayout::ChannelMajor => self.data[channel * self.proposals + proposal],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.channels - 4
    }
}

/// Keep proposals whose best class score reaches `threshold`, mapped back to
/// original-frame pixels. Ties go to the lowest class index. Overlapping
/// boxes are passed through as-is (no NMS).
pub fn decode(
    tensor: &RawTensor,
    threshold: f32,
    letterbox: &Letterbox,
    classes: &ClassTable,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for p in 0..tensor.proposals {
        let mut best_id = 0usize;
        let mut best = f32::NEG_INFINITY;
        for c in 0..tensor.num_classes() {
            let score = tensor.at(p, 4 + c);
            if score > best {
                best = score;
                best_id = c;
            }
        }

        // NaN scores fail this comparison too
        if !(best >= threshold) {
            continue;
        }

        let bbox = letterbox.to_original(
            tensor.at(p, 0),
            tensor.at(p, 1),
            tensor.at(p, 2),
            tensor.at(p, 3),
        );
        detections.push(Detection::new(best_id, best, bbox, classes));
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutricycle_core::BoundingBox;
    use proptest::prelude::*;

    fn letterbox() -> Letterbox {
        Letterbox::compute(640, 480, 320)
    }

    #[test]
    fn test_decode_single_object() {
        let tensor = RawTensor::new(
            vec![160.0, 200.0, 40.0, 60.0, 0.9],
            1,
            5,
            TensorLayout::ProposalMajor,
        )
        .unwrap();
        let dets = decode(&tensor, 0.5, &letterbox(), &ClassTable::default());

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(320.0, 320.0, 80.0, 120.0));
        assert_eq!(dets[0].class_name, "foreign_object");
        assert_eq!(dets[0].confidence, 0.9);
    }

    #[test]
    fn test_decode_channel_major_matches_proposal_major() {
        // two proposals, two classes
        let proposal_major = vec![
            10.0, 50.0, 4.0, 4.0, 0.2, 0.8, //
            100.0, 120.0, 8.0, 8.0, 0.7, 0.1,
        ];
        let mut channel_major = vec![0.0; 12];
        for p in 0..2 {
            for c in 0..6 {
                channel_major[c * 2 + p] = proposal_major[p * 6 + c];
            }
        }

        let classes = ClassTable::from_names(["a", "b"]);
        let a = decode(
            &RawTensor::new(proposal_major, 2, 6, TensorLayout::ProposalMajor).unwrap(),
            0.5,
            &letterbox(),
            &classes,
        );
        let b = decode(
            &RawTensor::new(channel_major, 2, 6, TensorLayout::ChannelMajor).unwrap(),
            0.5,
            &letterbox(),
            &classes,
        );

        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].class_name, "b");
        assert_eq!(a[1].class_name, "a");
    }

    #[test]
    fn test_tie_prefers_lowest_class() {
        let tensor = RawTensor::new(
            vec![0.0, 40.0, 1.0, 1.0, 0.6, 0.6, 0.6],
            1,
            7,
            TensorLayout::ProposalMajor,
        )
        .unwrap();
        let dets = decode(&tensor, 0.5, &letterbox(), &ClassTable::default());
        assert_eq!(dets[0].class_id, 0);
    }

    #[test]
    fn test_overlapping_boxes_are_kept() {
        let row = [160.0, 200.0, 40.0, 60.0, 0.9];
        let data: Vec<f32> = row.iter().chain(row.iter()).copied().collect();
        let tensor = RawTensor::new(data, 2, 5, TensorLayout::ProposalMajor).unwrap();
        assert_eq!(decode(&tensor, 0.5, &letterbox(), &ClassTable::default()).len(), 2);
    }

    #[test]
    fn test_nan_score_is_discarded() {
        let tensor = RawTensor::new(
            vec![1.0, 1.0, 1.0, 1.0, f32::NAN],
            1,
            5,
            TensorLayout::ProposalMajor,
        )
        .unwrap();
        assert!(decode(&tensor, 0.0, &letterbox(), &ClassTable::default()).is_empty());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(RawTensor::new(vec![0.0; 9], 2, 5, TensorLayout::ProposalMajor).is_err());
        assert!(RawTensor::new(vec![0.0; 4], 1, 4, TensorLayout::ProposalMajor).is_err());
    }

    proptest! {
        #[test]
        fn prop_all_detections_meet_threshold(
            scores in proptest::collection::vec(0.0f32..1.0, 3 * 20),
            threshold in 0.0f32..1.0,
        ) {
            // 20 proposals, 3 classes
            let mut data = Vec::with_capacity(20 * 7);
            for p in 0..20 {
                data.extend_from_slice(&[100.0, 100.0, 10.0, 10.0]);
                data.extend_from_slice(&scores[p * 3..p * 3 + 3]);
            }
            let tensor = RawTensor::new(data, 20, 7, TensorLayout::ProposalMajor).unwrap();
            let dets = decode(&tensor, threshold, &letterbox(), &ClassTable::default());

            let expected = (0..20)
                .filter(|p| scores[p * 3..p * 3 + 3].iter().cloned().fold(f32::MIN, f32::max) >= threshold)
                .count();
            prop_assert_eq!(dets.len(), expected);
            for det in &dets {
                prop_assert!(det.confidence >= threshold);
            }
        }
    }
}
