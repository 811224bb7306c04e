//! Weather Type Resolution
//!
//! Pure mapping from a raw 256-bit random word to one of the 19 weather
//! categories. Deterministic and replayable: the same word always resolves
//! to the same outcome, and a word of exactly zero is a legitimate draw
//! (index 0), not an error sentinel.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of weather categories. The raw random word is reduced modulo this.
pub const WEATHER_TYPE_COUNT: u8 = 19;

/// The closed set of weather categories a round can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherType {
    Sunny,
    MostlyClear,
    PartlyCloudy,
    MostlyCloudy,
    Overcast,
    Haze,
    Fog,
    Drizzle,
    LightRain,
    Rain,
    HeavyRain,
    Thunderstorm,
    Hail,
    Sleet,
    LightSnow,
    Snow,
    HeavySnow,
    Blizzard,
    Windstorm,
}

impl WeatherType {
    /// All categories in index order. `ALL[i]` is the category for index `i`.
    pub const ALL: [WeatherType; WEATHER_TYPE_COUNT as usize] = [
        WeatherType::Sunny,
        WeatherType::MostlyClear,
        WeatherType::PartlyCloudy,
        WeatherType::MostlyCloudy,
        WeatherType::Overcast,
        WeatherType::Haze,
        WeatherType::Fog,
        WeatherType::Drizzle,
        WeatherType::LightRain,
        WeatherType::Rain,
        WeatherType::HeavyRain,
        WeatherType::Thunderstorm,
        WeatherType::Hail,
        WeatherType::Sleet,
        WeatherType::LightSnow,
        WeatherType::Snow,
        WeatherType::HeavySnow,
        WeatherType::Blizzard,
        WeatherType::Windstorm,
    ];

    /// Category for a bounded index. Returns None for `index >= 19`.
    pub fn from_index(index: u8) -> Option<WeatherType> {
        Self::ALL.get(index as usize).copied()
    }

    /// Zero-based position of this category in the index table.
    pub fn index(&self) -> u8 {
        Self::ALL
            .iter()
            .position(|w| w == self)
            .expect("WeatherType::ALL covers every variant") as u8
    }

    /// Human label for display and the read API.
    pub fn label(&self) -> &'static str {
        match self {
            WeatherType::Sunny => "Sunny",
            WeatherType::MostlyClear => "Mostly Clear",
            WeatherType::PartlyCloudy => "Partly Cloudy",
            WeatherType::MostlyCloudy => "Mostly Cloudy",
            WeatherType::Overcast => "Overcast",
            WeatherType::Haze => "Haze",
            WeatherType::Fog => "Fog",
            WeatherType::Drizzle => "Drizzle",
            WeatherType::LightRain => "Light Rain",
            WeatherType::Rain => "Rain",
            WeatherType::HeavyRain => "Heavy Rain",
            WeatherType::Thunderstorm => "Thunderstorm",
            WeatherType::Hail => "Hail",
            WeatherType::Sleet => "Sleet",
            WeatherType::LightSnow => "Light Snow",
            WeatherType::Snow => "Snow",
            WeatherType::HeavySnow => "Heavy Snow",
            WeatherType::Blizzard => "Blizzard",
            WeatherType::Windstorm => "Windstorm",
        }
    }
}

impl fmt::Display for WeatherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The resolved outcome of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherOutcome {
    /// Index in [0, 18], `random_word mod 19`.
    pub index: u8,
    pub weather: WeatherType,
}

/// Reduce a raw random word to a weather outcome.
///
/// `index = word mod 19`. The word is arbitrary-width unsigned; the
/// remainder always fits a u8.
pub fn resolve_weather(random_word: &BigUint) -> WeatherOutcome {
    let modulus = BigUint::from(WEATHER_TYPE_COUNT);
    let remainder = random_word % &modulus;
    // Remainder of a mod-19 division: single digit, possibly absent for 0.
    let index = remainder.to_u32_digits().first().copied().unwrap_or(0) as u8;
    let weather = WeatherType::from_index(index)
        .expect("index is a mod-19 remainder and therefore in range");
    WeatherOutcome { index, weather }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_word_mod_19() {
        for raw in [0u64, 1, 18, 19, 20, 37, 38, 1_000_003, u64::MAX] {
            let outcome = resolve_weather(&BigUint::from(raw));
            assert_eq!(outcome.index as u64, raw % 19);
            assert!(outcome.index < WEATHER_TYPE_COUNT);
            assert_eq!(outcome.weather.index(), outcome.index);
        }
    }

    #[test]
    fn test_zero_word_is_a_legitimate_draw() {
        let outcome = resolve_weather(&BigUint::from(0u8));
        assert_eq!(outcome.index, 0);
        assert_eq!(outcome.weather, WeatherType::Sunny);
    }

    #[test]
    fn test_resolve_wide_word() {
        // 2^255: far beyond u128, exercises the BigUint path.
        let word = BigUint::from(1u8) << 255;
        let outcome = resolve_weather(&word);
        assert!(outcome.index < WEATHER_TYPE_COUNT);
        // 2^255 mod 19 == 8 (2 has order 18 mod 19; 255 mod 18 == 3 gives
        // 2^3 * 2^(18k) == 8).
        assert_eq!(outcome.index, 8);
    }

    #[test]
    fn test_index_table_is_closed_and_stable() {
        for index in 0..WEATHER_TYPE_COUNT {
            let weather = WeatherType::from_index(index).unwrap();
            assert_eq!(weather.index(), index);
            assert!(!weather.label().is_empty());
        }
        assert!(WeatherType::from_index(WEATHER_TYPE_COUNT).is_none());
        assert!(WeatherType::from_index(u8::MAX).is_none());
    }
}
