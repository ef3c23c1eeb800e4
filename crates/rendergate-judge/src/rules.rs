use rendergate_core::SpaceCategory;

/// Fixed category rules included in every judgment request. These are the
/// non-negotiable content constraints per space type; calibration guidance
/// layers on top but never replaces them.
pub fn rules_for(category: &SpaceCategory) -> String {
    let rules: &[&str] = match category {
        SpaceCategory::Bedroom => &[
            "must contain a bed",
            "must not contain bathroom fixtures (toilet, shower, bathtub)",
            "must not contain kitchen appliances",
        ],
        SpaceCategory::Bathroom => &[
            "must contain at least one of: toilet, shower, bathtub, sink",
            "must not contain a bed",
            "must not contain kitchen appliances",
        ],
        SpaceCategory::Kitchen => &[
            "must contain countertops and at least one appliance",
            "must not contain a bed",
            "must not contain bathroom fixtures",
        ],
        SpaceCategory::LivingRoom => &[
            "must contain seating furniture",
            "must not contain a bed",
            "must not contain bathroom fixtures",
        ],
        SpaceCategory::DiningRoom => &[
            "must contain a dining table",
            "must not contain a bed",
            "must not contain bathroom fixtures",
        ],
        SpaceCategory::Office => &[
            "must contain a desk or work surface",
            "must not contain bathroom fixtures",
        ],
        SpaceCategory::Hallway => &[
            "must be a circulation space without major furniture",
            "must not contain fixtures belonging to other room types",
        ],
        SpaceCategory::Other(_) => &[
            "must plausibly match its declared category",
            "must not contain fixtures that contradict the declared category",
        ],
    };

    let mut out = String::new();
    for rule in rules {
        out.push_str("- ");
        out.push_str(rule);
        out.push('\n');
    }
    out.push_str(
        "- the room layout must structurally match the provided floor plan references\n\
         - when a directional or position anchor is provided, the view must respect it\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bedroom_rules_exclude_bathroom_fixtures() {
        let rules = rules_for(&SpaceCategory::Bedroom);
        assert!(rules.contains("must contain a bed"));
        assert!(rules.contains("bathroom fixtures"));
    }

    #[test]
    fn every_category_gets_structural_rule() {
        for category in [
            SpaceCategory::Bedroom,
            SpaceCategory::Kitchen,
            SpaceCategory::Other("garage".to_string()),
        ] {
            assert!(rules_for(&category).contains("floor plan references"));
        }
    }
}
