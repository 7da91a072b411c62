//! Static factor catalogue and the deterministic keyword matcher.
//!
//! The catalogue is read-only once loaded and shared across sessions behind
//! an `Arc`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FactorCategory {
    Trend,
    #[serde(rename = "Mean Reversion")]
    MeanReversion,
    Volatility,
    #[serde(rename = "Risk-off")]
    RiskOff,
    Carry,
}

impl FactorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorCategory::Trend => "Trend",
            FactorCategory::MeanReversion => "Mean Reversion",
            FactorCategory::Volatility => "Volatility",
            FactorCategory::RiskOff => "Risk-off",
            FactorCategory::Carry => "Carry",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FactorCategory::Trend => "identify and follow price direction",
            FactorCategory::MeanReversion => "fade stretched prices in ranging markets",
            FactorCategory::Volatility => "measure volatility for sizing and regime filters",
            FactorCategory::RiskOff => "detect hostile conditions and stand aside",
            FactorCategory::Carry => "capture funding and rate differentials",
        }
    }

    /// Parse a user-supplied category name, ignoring case, spaces and dashes.
    pub fn parse_loose(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "trend" => Some(FactorCategory::Trend),
            "meanreversion" => Some(FactorCategory::MeanReversion),
            "volatility" => Some(FactorCategory::Volatility),
            "riskoff" => Some(FactorCategory::RiskOff),
            "carry" => Some(FactorCategory::Carry),
            _ => None,
        }
    }
}

impl fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named factor the generator may build a strategy from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorInfo {
    pub name: String,
    pub category: FactorCategory,
    pub frequency: String,
    pub data_source: String,
    pub calculation: String,
    /// Market regime in which the factor tends to work.
    pub regime: String,
    pub intuition: String,
    #[serde(default)]
    pub scenarios: Vec<String>,
}

impl FactorInfo {
    /// Markdown block listing every field, numbered for a selection list.
    pub fn render(&self, index: usize) -> String {
        format!(
            "## {}. {}\n\
             - **Category**: {}\n\
             - **Frequency**: {}\n\
             - **Data source**: {}\n\
             - **Intuition**: {}\n\
             - **Scenarios**: {}\n\
             - **Regime**: {}\n\
             - **Calculation**:\n```python\n{}\n```\n",
            index,
            self.name,
            self.category,
            self.frequency,
            self.data_source,
            self.intuition,
            self.scenarios.join(", "),
            self.regime,
            self.calculation
        )
    }
}

const FREQUENCIES: &[&str] = &["5m", "15m", "1h", "4h", "1d"];

const INDICATOR_KEYWORDS: &[&str] = &[
    "rsi", "macd", "bollinger", "kdj", "cci", "aroon", "stoch", "willr", "roc", "adx", "ema",
    "sma", "ma",
];

/// Name fragments an indicator keyword should match in factor names.
fn name_fragments(keyword: &str) -> &'static [&'static str] {
    match keyword {
        "bollinger" => &["bb"],
        "stoch" => &["stoch"],
        "ma" => &["ema", "sma"],
        "rsi" => &["rsi"],
        "macd" => &["macd"],
        "kdj" => &["kdj"],
        "cci" => &["cci"],
        "aroon" => &["aroon"],
        "willr" => &["willr"],
        "roc" => &["roc"],
        "adx" => &["adx"],
        "ema" => &["ema"],
        "sma" => &["sma"],
        _ => &[],
    }
}

#[derive(Debug, Clone)]
pub struct FactorCatalogue {
    factors: Vec<FactorInfo>,
}

impl FactorCatalogue {
    pub fn new(factors: Vec<FactorInfo>) -> Self {
        Self { factors }
    }

    /// Load a JSON array of factors.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read factor catalogue {}", path.display()))?;
        let factors: Vec<FactorInfo> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse factor catalogue {}", path.display()))?;
        Ok(Self::new(factors))
    }

    pub fn all(&self) -> &[FactorInfo] {
        &self.factors
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FactorInfo> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn by_category(&self, category: FactorCategory) -> Vec<&FactorInfo> {
        self.factors.iter().filter(|f| f.category == category).collect()
    }

    /// Catalogue overview grouped by category, for the selection prompt.
    pub fn summary(&self) -> String {
        let mut out = format!("{} factors available.\n", self.factors.len());
        let mut categories: Vec<FactorCategory> = self.factors.iter().map(|f| f.category).collect();
        categories.sort();
        categories.dedup();
        for category in categories {
            let mut members = self.by_category(category);
            members.sort_by(|a, b| a.name.cmp(&b.name));
            out.push_str(&format!(
                "\n## {} ({}) - {}\n",
                category,
                members.len(),
                category.description()
            ));
            for f in members {
                out.push_str(&format!(
                    "- {} [{}; {}] {} Scenarios: {}. Regime: {}\n",
                    f.name,
                    f.frequency,
                    f.data_source,
                    f.intuition,
                    f.scenarios.join(", "),
                    f.regime
                ));
            }
        }
        out
    }

    /// Keyword/category matcher over the requirement text.
    ///
    /// Filters by detected category, frequency and indicator names together;
    /// if that finds nothing, retries with indicator names alone.
    pub fn match_requirement(&self, requirement: &str) -> Vec<&FactorInfo> {
        let text = requirement.to_lowercase().replace(['-', '_'], " ");
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let category = detect_category(&text);
        let frequency = FREQUENCIES.iter().copied().find(|f| tokens.contains(f));
        let keywords: Vec<&str> = INDICATOR_KEYWORDS
            .iter()
            .copied()
            .filter(|kw| tokens.iter().any(|t| token_names_indicator(t, kw)))
            .collect();
        if category.is_none() && frequency.is_none() && keywords.is_empty() {
            return Vec::new();
        }

        let matches = |f: &&FactorInfo, with_filters: bool| -> bool {
            if with_filters {
                if category.is_some_and(|c| c != f.category) {
                    return false;
                }
                if frequency.is_some_and(|fr| fr != f.frequency) {
                    return false;
                }
            }
            if keywords.is_empty() {
                return true;
            }
            let name = f.name.to_lowercase();
            keywords
                .iter()
                .any(|kw| name_fragments(kw).iter().any(|frag| name.contains(frag)))
        };

        let strict: Vec<&FactorInfo> = self.factors.iter().filter(|f| matches(f, true)).collect();
        if !strict.is_empty() {
            return strict;
        }
        if keywords.is_empty() {
            return Vec::new();
        }
        self.factors.iter().filter(|f| matches(f, false)).collect()
    }
}

/// `rsi`, `rsi14` and (for longer names) `stochastic` all name their indicator;
/// `make` does not name `ma`.
fn token_names_indicator(token: &str, keyword: &str) -> bool {
    match token.strip_prefix(keyword) {
        Some("") => true,
        Some(rest) => keyword.len() >= 4 || rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn detect_category(text: &str) -> Option<FactorCategory> {
    let any = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if any(&["trend", "momentum", "breakout"]) {
        Some(FactorCategory::Trend)
    } else if any(&["mean reversion", "reversal", "revert", "overbought", "oversold"]) {
        Some(FactorCategory::MeanReversion)
    } else if any(&["volatility", "volatile"]) {
        Some(FactorCategory::Volatility)
    } else if any(&["carry", "funding"]) {
        Some(FactorCategory::Carry)
    } else if any(&["risk", "protection", "drawdown control"]) {
        Some(FactorCategory::RiskOff)
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn factor(
    name: &str,
    category: FactorCategory,
    frequency: &str,
    data_source: &str,
    calculation: &str,
    regime: &str,
    intuition: &str,
    scenarios: &[&str],
) -> FactorInfo {
    FactorInfo {
        name: name.to_string(),
        category,
        frequency: frequency.to_string(),
        data_source: data_source.to_string(),
        calculation: calculation.to_string(),
        regime: regime.to_string(),
        intuition: intuition.to_string(),
        scenarios: scenarios.iter().map(|s| s.to_string()).collect(),
    }
}

const BASE: &str = "Base timeframe OHLCV";
const INFORMATIVE: &str = "Informative timeframe";

impl Default for FactorCatalogue {
    fn default() -> Self {
        use FactorCategory::*;
        Self::new(vec![
            factor(
                "RSI_14",
                MeanReversion,
                "5m",
                BASE,
                "df[\"RSI_14\"] = pta.rsi(df[\"close\"], length=14)",
                "Ranging market (ADX < 25) with moderate volatility",
                "Extreme RSI readings mark crowded one-sided positioning that tends to revert.",
                &["range trading", "overbought/oversold", "reversal entries"],
            ),
            factor(
                "RSI_3",
                MeanReversion,
                "5m",
                BASE,
                "df[\"RSI_3\"] = pta.rsi(df[\"close\"], length=3)",
                "Short-term choppy market needing fast reaction",
                "A 3-period RSI reacts to every swing and flags short-lived overreactions.",
                &["scalping", "fast reversal", "5m trading"],
            ),
            factor(
                "RSI_14_1h",
                MeanReversion,
                "1h",
                INFORMATIVE,
                "informative_1h[\"RSI_14\"] = pta.rsi(informative_1h[\"close\"], length=14)",
                "Higher-timeframe range confirmation",
                "Hourly RSI filters base-timeframe reversals against the larger swing.",
                &["multi-timeframe filter", "reversal confirmation"],
            ),
            factor(
                "CCI_20_4h",
                MeanReversion,
                "4h",
                INFORMATIVE,
                "informative_4h[\"CCI_20\"] = pta.cci(high, low, close, length=20)",
                "Swing ranges on the 4h chart",
                "CCI measures distance from the typical-price mean; extremes revert.",
                &["swing reversal", "multi-timeframe filter"],
            ),
            factor(
                "STOCHRSIk_14_14_3_3_15m",
                MeanReversion,
                "15m",
                INFORMATIVE,
                "stoch = pta.stochrsi(close, length=14, rsi_length=14, k=3, d=3)",
                "Short ranges with frequent oscillation",
                "Stochastic RSI sharpens RSI turns inside a range.",
                &["oscillator timing", "overbought/oversold"],
            ),
            factor(
                "WILLR_14",
                MeanReversion,
                "5m",
                BASE,
                "df[\"WILLR_14\"] = pta.willr(high, low, close, length=14)",
                "Ranging market",
                "Williams %R locates the close inside the recent range; extremes fade.",
                &["range trading", "oversold bounce"],
            ),
            factor(
                "EMA_20",
                Trend,
                "5m",
                BASE,
                "df[\"EMA_20\"] = pta.ema(df[\"close\"], length=20)",
                "Trending market",
                "Price holding above a rising short EMA signals persistent demand.",
                &["trend following", "pullback entries"],
            ),
            factor(
                "EMA_200",
                Trend,
                "5m",
                BASE,
                "df[\"EMA_200\"] = pta.ema(df[\"close\"], length=200)",
                "Any; used as a regime filter",
                "The long EMA separates bull and bear regimes.",
                &["trend filter", "regime detection"],
            ),
            factor(
                "SMA_200",
                Trend,
                "1d",
                INFORMATIVE,
                "informative_1d[\"SMA_200\"] = pta.sma(informative_1d[\"close\"], length=200)",
                "Long-horizon trend",
                "The daily 200 SMA is widely watched and acts as a self-fulfilling level.",
                &["trend filter", "long-term bias"],
            ),
            factor(
                "MACD_12_26_9",
                Trend,
                "1h",
                INFORMATIVE,
                "macd = pta.macd(close, fast=12, slow=26, signal=9)",
                "Emerging or established trends",
                "The MACD histogram turns when momentum changes sign.",
                &["momentum", "trend confirmation", "crossover entries"],
            ),
            factor(
                "AROONU_14_4h",
                Trend,
                "4h",
                INFORMATIVE,
                "aroon = pta.aroon(high, low, length=14)",
                "New highs being made on the 4h chart",
                "Recent new highs indicate trend strength.",
                &["breakout", "trend strength"],
            ),
            factor(
                "ROC_9_1d",
                Trend,
                "1d",
                INFORMATIVE,
                "informative_1d[\"ROC_9\"] = pta.roc(informative_1d[\"close\"], length=9)",
                "Persistent daily momentum",
                "Rate of change captures momentum continuation.",
                &["momentum", "trend filter"],
            ),
            factor(
                "ADX_14",
                Trend,
                "1h",
                INFORMATIVE,
                "adx = pta.adx(high, low, close, length=14)",
                "Distinguishes trend (ADX > 25) from range",
                "Directional strength decides whether trend or reversal logic applies.",
                &["regime detection", "trend strength"],
            ),
            factor(
                "BBB_20_2.0",
                Volatility,
                "5m",
                BASE,
                "bb = pta.bbands(close, length=20, std=2.0); df[\"BBB_20_2.0\"] = bb[\"BBB_20_2.0\"]",
                "Volatility contraction before expansion",
                "Bollinger bandwidth squeezes precede large moves.",
                &["squeeze breakout", "volatility filter"],
            ),
            factor(
                "BBP_20_2.0",
                MeanReversion,
                "5m",
                BASE,
                "bb = pta.bbands(close, length=20, std=2.0); df[\"BBP_20_2.0\"] = bb[\"BBP_20_2.0\"]",
                "Ranging market",
                "Bollinger %B outside [0, 1] marks stretched prices.",
                &["band reversal", "overbought/oversold"],
            ),
            factor(
                "ATR_14",
                Volatility,
                "1h",
                INFORMATIVE,
                "df[\"ATR_14\"] = pta.atr(high, low, close, length=14)",
                "All regimes",
                "Average true range scales stops and position size to current volatility.",
                &["stop placement", "position sizing"],
            ),
            factor(
                "num_empty_288",
                RiskOff,
                "5m",
                BASE,
                "df[\"num_empty_288\"] = (df[\"volume\"] <= 0).rolling(288).sum()",
                "Illiquid or halted markets",
                "Many zero-volume candles indicate an untradeable pair.",
                &["liquidity filter", "protection"],
            ),
            factor(
                "protections_long_global",
                RiskOff,
                "5m",
                BASE,
                "df[\"protections_long_global\"] = (df[\"RSI_14_1h\"] < 85) & (df[\"close\"] > df[\"EMA_200\"] * 0.9)",
                "Crash or euphoric spikes",
                "Global guard that blocks long entries during extreme moves.",
                &["risk control", "crash protection"],
            ),
            factor(
                "funding_rate_8h",
                Carry,
                "1h",
                "Exchange funding rate feed",
                "df[\"funding_rate_8h\"] = funding[\"rate\"].rolling(8).mean()",
                "Perpetual futures with persistent funding imbalance",
                "Extreme funding shows leveraged crowding that pays the other side.",
                &["funding arbitrage", "crowding signal"],
            ),
        ])
    }
}
