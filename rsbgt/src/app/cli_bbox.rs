use crate::geo_core::BoundingBox;

/// Parse `min_x,min_y,max_x,max_y` from the command line
pub fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let values = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid coordinate '{}': {}", v.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match values.as_slice() {
        [min_x, min_y, max_x, max_y] => {
            let bbox = BoundingBox::new(*min_x, *min_y, *max_x, *max_y);
            if bbox.is_valid() {
                Ok(bbox)
            } else {
                Err(format!(
                    "bounding box '{}' must satisfy min_x < max_x and min_y < max_y",
                    s
                ))
            }
        }
        _ => Err(format!(
            "expected 4 comma-separated values (min_x,min_y,max_x,max_y), found {}",
            values.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("155000, 463000,155500,463500"),
            Ok(BoundingBox::new(155000.0, 463000.0, 155500.0, 463500.0))
        );
        assert_eq!(
            parse_bbox("-1.5,-2,3,4"),
            Ok(BoundingBox::new(-1.5, -2.0, 3.0, 4.0))
        );
    }

    #[test]
    fn test_parse_bbox_errors() {
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("1,2,3,x").is_err());
        assert!(parse_bbox("3,2,1,4").is_err());
    }
}
