use fungen_types::BoundingBox;

/// Region of interest in `x, y, w, h` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Roi {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_box(bbox: &BoundingBox) -> Self {
        Self::new(
            bbox.x1.round() as i32,
            bbox.y1.round() as i32,
            bbox.width().round() as i32,
            bbox.height().round() as i32,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

/// Union of the reference box and its interacting boxes, padded and clamped
/// to the frame.
pub fn calculate_combined_roi(
    frame_width: u32,
    frame_height: u32,
    reference: &Roi,
    interacting: &[Roi],
    padding: i32,
) -> Roi {
    let mut x1 = reference.x;
    let mut y1 = reference.y;
    let mut x2 = reference.x + reference.w;
    let mut y2 = reference.y + reference.h;
    for other in interacting.iter().filter(|other| !other.is_empty()) {
        x1 = x1.min(other.x);
        y1 = y1.min(other.y);
        x2 = x2.max(other.x + other.w);
        y2 = y2.max(other.y + other.h);
    }
    let (fw, fh) = (frame_width as i32, frame_height as i32);
    let x1 = (x1 - padding).max(0);
    let y1 = (y1 - padding).max(0);
    let x2 = (x2 + padding).min(fw);
    let y2 = (y2 + padding).min(fh);
    Roi::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
}

/// Moves `previous` toward `candidate` by `factor`; with no previous ROI the
/// candidate is taken as is.
pub fn smooth_roi_transition(previous: Option<&Roi>, candidate: &Roi, factor: f64) -> Roi {
    let Some(previous) = previous else {
        return *candidate;
    };
    let factor = factor.clamp(0.0, 1.0);
    let blend = |old: i32, new: i32| (f64::from(old) * (1.0 - factor) + f64::from(new) * factor).round() as i32;
    Roi::new(
        blend(previous.x, candidate.x),
        blend(previous.y, candidate.y),
        blend(previous.w, candidate.w),
        blend(previous.h, candidate.h),
    )
}

/// Narrows a panoramic ROI around its centre so the wide field of view does
/// not leak unrelated motion into the flow.
///
/// Hand and mouth categories lock the width to the reference box; others cap
/// it at twice the reference width.
pub fn clamp_vr_roi(roi: &Roi, reference_width: i32, hand_or_mouth: bool, frame_width: u32) -> Roi {
    let new_w = if hand_or_mouth {
        reference_width
    } else {
        roi.w.min(reference_width * 2)
    };
    if new_w <= 0 {
        return *roi;
    }
    let center = f64::from(roi.x) + f64::from(roi.w) / 2.0;
    let new_x = (center - f64::from(new_w) / 2.0) as i32;
    let fw = frame_width as i32;
    let final_w = new_w.min(fw);
    let final_x = new_x.min(fw - final_w).max(0);
    Roi::new(final_x, roi.y, final_w, roi.h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_roi_unions_pads_and_clamps() {
        let reference = Roi::new(100, 100, 50, 80);
        let others = [Roi::new(80, 150, 40, 60), Roi::new(0, 0, 0, 0)];
        let roi = calculate_combined_roi(640, 230, &reference, &others, 20);
        assert_eq!(roi, Roi::new(60, 80, 110, 150));
    }

    #[test]
    fn smoothing_blends_toward_candidate() {
        let previous = Roi::new(0, 0, 100, 100);
        let candidate = Roi::new(100, 50, 200, 100);
        assert_eq!(
            smooth_roi_transition(Some(&previous), &candidate, 0.6),
            Roi::new(60, 30, 160, 100)
        );
        assert_eq!(smooth_roi_transition(None, &candidate, 0.6), candidate);
    }

    #[test]
    fn vr_clamp_recenters_narrower_roi() {
        let roi = Roi::new(100, 10, 400, 200);
        assert_eq!(clamp_vr_roi(&roi, 80, true, 1920), Roi::new(260, 10, 80, 200));
        assert_eq!(clamp_vr_roi(&roi, 80, false, 1920), Roi::new(220, 10, 160, 200));
        assert_eq!(clamp_vr_roi(&roi, 300, false, 1920), roi);
    }

    #[test]
    fn vr_clamp_stays_inside_frame() {
        let roi = Roi::new(0, 0, 40, 40);
        assert_eq!(clamp_vr_roi(&roi, 100, true, 60), Roi::new(0, 0, 60, 40));
    }
}
