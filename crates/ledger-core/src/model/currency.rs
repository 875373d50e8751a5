use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub code: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
}

pub const SUPPORTED_CURRENCIES: &[Currency] = &[
    Currency {
        code: "USD",
        symbol: "$",
        name: "US Dollar",
    },
    Currency {
        code: "EUR",
        symbol: "€",
        name: "Euro",
    },
    Currency {
        code: "GBP",
        symbol: "£",
        name: "British Pound",
    },
    Currency {
        code: "JPY",
        symbol: "¥",
        name: "Japanese Yen",
    },
    Currency {
        code: "NGN",
        symbol: "₦",
        name: "Nigerian Naira",
    },
    Currency {
        code: "CAD",
        symbol: "C$",
        name: "Canadian Dollar",
    },
];

impl Currency {
    pub fn from_code(code: &str) -> Option<&'static Currency> {
        SUPPORTED_CURRENCIES
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code.trim()))
    }

    pub fn default_currency() -> &'static Currency {
        &SUPPORTED_CURRENCIES[0]
    }

    /// `"$ 1,234.56"`. Negative amounts keep the sign after the symbol.
    pub fn format_amount(&self, amount: f64) -> String {
        format!("{} {}", self.symbol, group_thousands(amount))
    }
}

fn group_thousands(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}
