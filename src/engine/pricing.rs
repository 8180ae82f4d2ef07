use crate::models::pickup::{WasteDetails, WasteType};

const FOOD_BOX_POINTS: u32 = 10;
const BOTTLE_POINTS: u32 = 15;
const OTHER_POINTS: u32 = 20;

const BASE_RATE: f64 = 50.0;
const PER_KM_RATE: f64 = 2.0;
const PER_KG_RATE: f64 = 5.0;

/// Reward points for a collected pickup. Missing counts score zero.
pub fn points_for(waste_type: WasteType, details: &WasteDetails) -> u32 {
    let food = details.food_boxes.unwrap_or(0) * FOOD_BOX_POINTS;
    let bottles = details.bottles.unwrap_or(0) * BOTTLE_POINTS;

    match waste_type {
        WasteType::Food => food,
        WasteType::Bottles => bottles,
        WasteType::Other => OTHER_POINTS,
        WasteType::Mixed => food + bottles + OTHER_POINTS,
    }
}

/// Agent earnings: base rate plus distance and weight components,
/// rounded to the nearest whole currency unit.
pub fn earnings_for(distance_km: f64, weight_kg: f64) -> f64 {
    (BASE_RATE + distance_km * PER_KM_RATE + weight_kg * PER_KG_RATE).round()
}

#[cfg(test)]
mod tests {
    use super::{earnings_for, points_for};
    use crate::models::pickup::{WasteDetails, WasteType};

    fn details(food_boxes: Option<u32>, bottles: Option<u32>) -> WasteDetails {
        WasteDetails {
            food_boxes,
            bottles,
            other_description: None,
        }
    }

    #[test]
    fn mixed_waste_sums_all_components() {
        let points = points_for(WasteType::Mixed, &details(Some(2), Some(3)));
        assert_eq!(points, 2 * 10 + 3 * 15 + 20);
    }

    #[test]
    fn food_counts_only_food_boxes() {
        let points = points_for(WasteType::Food, &details(Some(4), Some(99)));
        assert_eq!(points, 40);
    }

    #[test]
    fn other_is_a_flat_rate() {
        let points = points_for(WasteType::Other, &details(None, None));
        assert_eq!(points, 20);
    }

    #[test]
    fn zero_inputs_yield_zero_points() {
        assert_eq!(points_for(WasteType::Food, &details(None, None)), 0);
        assert_eq!(points_for(WasteType::Bottles, &details(Some(5), None)), 0);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let d = details(Some(2), Some(3));
        assert_eq!(
            points_for(WasteType::Mixed, &d),
            points_for(WasteType::Mixed, &d)
        );
    }

    #[test]
    fn earnings_formula() {
        assert_eq!(earnings_for(5.0, 3.0), 75.0);
    }

    #[test]
    fn earnings_round_to_whole_units() {
        // 50 + 0.3*2 + 0*5 = 50.6
        assert_eq!(earnings_for(0.3, 0.0), 51.0);
        // 50 + 0.1*2 + 0*5 = 50.2
        assert_eq!(earnings_for(0.1, 0.0), 50.0);
    }
}
