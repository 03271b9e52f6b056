/*!
 # Day-of-week helpers

 Bitmask constants for the seven weekdays plus the name lookups and
 formatting used by schedules, logs and the command line tools.
 Bit *i* of a mask stands for weekday *i*, counted from Sunday = 0.
*/

use tracing::trace;

/// Returned by [`day_of_week_from_str`] when the input names no weekday
pub const INVALID_DAY: u8 = 255;

const SHORT_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const LONG_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];
const MASK_NAMES: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

/// Represents days of the week for scheduling
#[derive(Debug, Clone, Copy)]
pub struct Days {
    /// Sunday (0x01)
    pub sunday: u8,
    /// Monday (0x02)
    pub monday: u8,
    /// Tuesday (0x04)
    pub tuesday: u8,
    /// Wednesday (0x08)
    pub wednesday: u8,
    /// Thursday (0x10)
    pub thursday: u8,
    /// Friday (0x20)
    pub friday: u8,
    /// Saturday (0x40)
    pub saturday: u8,
    /// All days (0x7F)
    pub all: u8,
    /// Week days (Monday-Friday, 0x3E)
    pub week_days: u8,
    /// Weekend days (Saturday-Sunday, 0x41)
    pub weekend_days: u8,
    /// No days (0x00)
    pub none: u8,
}

/// Predefined day constants for scheduling
pub const WEEK_DAYS: Days = Days {
    sunday: 0x01,
    monday: 0x02,
    tuesday: 0x04,
    wednesday: 0x08,
    thursday: 0x10,
    friday: 0x20,
    saturday: 0x40,
    all: 0x01 + 0x02 + 0x04 + 0x08 + 0x10 + 0x20 + 0x40,
    week_days: 0x02 + 0x04 + 0x08 + 0x10 + 0x20,
    weekend_days: 0x01 + 0x40,
    none: 0x00,
};

/// Whether weekday `dow` (0 = Sunday) is set in `mask`
pub fn is_day_in_mask(mask: u8, dow: u8) -> bool {
    dow < 7 && mask & (1 << dow) != 0
}

/// Three-letter name for a weekday, `"???"` when out of range
pub fn day_of_week_str(dow: u8) -> &'static str {
    SHORT_NAMES.get(dow as usize).copied().unwrap_or("???")
}

/// Parses a short (`"Mon"`) or full (`"Monday"`) weekday name,
/// ignoring case. Returns [`INVALID_DAY`] for anything else.
pub fn day_of_week_from_str(s: &str) -> u8 {
    let s = s.trim();
    SHORT_NAMES
        .iter()
        .zip(LONG_NAMES.iter())
        .position(|(short, long)| s.eq_ignore_ascii_case(short) || s.eq_ignore_ascii_case(long))
        .map(|i| i as u8)
        .unwrap_or(INVALID_DAY)
}

/// Formats a day mask as two-letter names joined by commas
/// (`"Mo,We,Fr"`), or `"None"` when no day is set.
pub fn format_day_mask(mask: u8) -> String {
    let days: Vec<&str> = (0..7u8)
        .filter(|&dow| is_day_in_mask(mask, dow))
        .map(|dow| MASK_NAMES[dow as usize])
        .collect();

    if days.is_empty() {
        "None".to_string()
    } else {
        days.join(",")
    }
}

/// Parse days string to bitmask
///
/// Accepts day names (`mon`, `monday`, ...), the groups `all`,
/// `weekdays` and `weekend`, or a comma separated list of any of these.
/// Unknown words contribute nothing to the mask.
pub fn parse_days(days: &str) -> u8 {
    let result = match days.trim().to_lowercase().as_str() {
        "all" => WEEK_DAYS.all,
        "weekdays" => WEEK_DAYS.week_days,
        "weekend" => WEEK_DAYS.weekend_days,
        "none" | "" => WEEK_DAYS.none,
        single if !single.contains(',') => match day_of_week_from_str(single) {
            INVALID_DAY => WEEK_DAYS.none,
            dow => 1 << dow,
        },
        composite => composite
            .split(',')
            .fold(WEEK_DAYS.none, |mask, day| mask | parse_days(day)),
    };

    trace!("Days '{}' parsed to bitmask: {:#04x}", days, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_of_week_str_all_days() {
        let expected = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
        for (i, name) in expected.iter().enumerate() {
            assert_eq!(day_of_week_str(i as u8), *name);
        }
        assert_eq!(day_of_week_str(7), "???");
    }

    #[test]
    fn test_day_of_week_from_str_short_and_long() {
        assert_eq!(day_of_week_from_str("Sun"), 0);
        assert_eq!(day_of_week_from_str("Sat"), 6);
        assert_eq!(day_of_week_from_str("Wednesday"), 3);
        assert_eq!(day_of_week_from_str("fRiDaY"), 5);
        assert_eq!(day_of_week_from_str("tue"), 2);
    }

    #[test]
    fn test_day_of_week_from_str_invalid() {
        assert_eq!(day_of_week_from_str("Funday"), INVALID_DAY);
        assert_eq!(day_of_week_from_str(""), INVALID_DAY);
    }

    #[test]
    fn test_format_day_mask() {
        assert_eq!(format_day_mask(0b0010_0010), "Mo,Fr");
        assert_eq!(format_day_mask(0), "None");
        assert_eq!(format_day_mask(WEEK_DAYS.all), "Su,Mo,Tu,We,Th,Fr,Sa");
        assert_eq!(format_day_mask(WEEK_DAYS.weekend_days), "Su,Sa");
    }

    #[test]
    fn test_group_constants() {
        assert_eq!(WEEK_DAYS.all, 0x7F);
        assert_eq!(WEEK_DAYS.week_days, 0b0011_1110);
        assert_eq!(WEEK_DAYS.weekend_days, 0b0100_0001);
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(parse_days("weekdays"), WEEK_DAYS.week_days);
        assert_eq!(parse_days("mon,fri"), WEEK_DAYS.monday | WEEK_DAYS.friday);
        assert_eq!(parse_days("Saturday, sun"), WEEK_DAYS.weekend_days);
        assert_eq!(parse_days("weekend,wed"), 0b0100_1001);
        assert_eq!(parse_days("bogus"), 0);
    }
}
