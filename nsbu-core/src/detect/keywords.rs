//! Header keyword sets (Russian, Uzbek Latin, English)
//!
//! All patterns run against text already passed through [`crate::text::normalize`].

use regex::Regex;
use std::sync::OnceLock;

macro_rules! keyword_regex {
    ($name:ident, $pattern:expr) => {
        pub fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

keyword_regex!(
    code_header,
    r"^(код|kod|code)\b|^№|\b(код|kod) (строки|стр|qator)|qator kodi|satr kodi|line code"
);

keyword_regex!(
    label_header,
    r"наименование|показател|^стать[яи]|^актив|^пассив|ko'rsatkich|nomi\b|moddalar|^items?\b|description|^account|line item|^indicator"
);

keyword_regex!(
    start_header,
    r"на начало|начало (отчетного )?(периода|года)|boshi|boshiga|beginning|opening|^start\b"
);

keyword_regex!(
    end_header,
    r"на конец|конец (отчетного )?(периода|года)|oxiri|oxiriga|end of|\bat end\b|closing|^end\b"
);

keyword_regex!(
    month_token,
    r"январ|феврал|\bмарт|апрел|\bма[йя]\b|\bиюн|\bиюл|август|сентябр|октябр|ноябр|декабр|yanvar|fevral|\bmart\b|aprel|\bmay\b|iyun|iyul|avgust|sentyabr|oktyabr|noyabr|dekabr|january|february|march|april|june|july|august|september|october|november|december|\b(jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\b"
);

keyword_regex!(
    quarter_token,
    r"\b(i|ii|iii|iv|[1-4])[ -]?(кв|квартал|chorak|quarter)|\bq[1-4]\b|квартал|chorak|quarter"
);

keyword_regex!(year_token, r"\b(19|20)\d{2}\b");

keyword_regex!(
    period_phrase,
    r"отчетн(ый|ого|ом) (период|год)|за период|прошл(ый|ого|ом) год|аналогичн|hisobot davri|o'tgan yil|reporting period|prior (year|period)|current (year|period)|previous (year|period)"
);

keyword_regex!(
    total_column,
    r"^(итого|всего|jami|total)\b|\b(итого|всего|jami|total)$"
);

keyword_regex!(unit_billion, r"млрд|\bmlrd\b|billion|\bbn\b");
keyword_regex!(unit_million, r"млн|\bmln\b|million|\bmio\b");
keyword_regex!(unit_thousand, r"тыс|\bming\b|thousand|'000|\bk ?(uzs|sum|so'm)\b");
keyword_regex!(
    unit_one,
    r"в сумах|so'mda\b|\bin (units|uzs|sum|so'm)\b|\bв единицах\b"
);

keyword_regex!(
    footer_marker,
    r"^(руководитель|директор|генеральный директор|главный бухгалтер|бухгалтер|rahbar|direktor|bosh buxgalter|buxgalter|director|chief accountant|accountant|ceo|cfo)\b"
);

/// Unit divisor declared by a header text, if any
pub fn unit_divisor(text: &str) -> Option<u64> {
    if unit_billion().is_match(text) {
        Some(1_000_000_000)
    } else if unit_million().is_match(text) {
        Some(1_000_000)
    } else if unit_thousand().is_match(text) {
        Some(1_000)
    } else if unit_one().is_match(text) {
        Some(1)
    } else {
        None
    }
}

/// Header text naming a period column
pub fn is_period_header(text: &str) -> bool {
    if total_column().is_match(text) {
        return false;
    }
    month_token().is_match(text)
        || quarter_token().is_match(text)
        || year_token().is_match(text)
        || period_phrase().is_match(text)
}

/// Number format shows a date
pub fn is_date_format(fmt: &str) -> bool {
    let lower = fmt.to_lowercase();
    (lower.contains('d')
        || lower.contains('y')
        || (lower.contains('m') && !lower.contains('0') && !lower.contains('#')))
        && !lower.contains("general")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize;
    use rstest::rstest;

    #[rstest]
    #[case("(в тыс. сум)", Some(1_000))]
    #[case("ming so'mda", Some(1_000))]
    #[case("млн. сум", Some(1_000_000))]
    #[case("in billion UZS", Some(1_000_000_000))]
    #[case("в сумах", Some(1))]
    #[case("Бухгалтерский баланс", None)]
    fn test_unit_divisor(#[case] text: &str, #[case] expected: Option<u64>) {
        assert_eq!(unit_divisor(&normalize(text)), expected);
    }

    #[rstest]
    #[case("Январь 2024", true)]
    #[case("Mart", true)]
    #[case("Q3", true)]
    #[case("II квартал", true)]
    #[case("2023", true)]
    #[case("За отчетный период", true)]
    #[case("Итого за год", false)]
    #[case("Total 2024", false)]
    #[case("Наименование показателя", false)]
    fn test_period_header(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(is_period_header(&normalize(text)), expected);
    }

    #[rstest]
    #[case("Код стр.", true)]
    #[case("Qator kodi", true)]
    #[case("№", true)]
    #[case("Кодекс", false)]
    fn test_code_header(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(code_header().is_match(&normalize(text)), expected);
    }

    #[rstest]
    #[case("Руководитель ____________", true)]
    #[case("Главный бухгалтер", true)]
    #[case("Bosh buxgalter", true)]
    #[case("Бухгалтерский баланс", false)]
    #[case("Расходы на директора", false)]
    fn test_footer_marker(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(footer_marker().is_match(&normalize(text)), expected);
    }

    #[test]
    fn test_start_end_headers() {
        assert!(start_header().is_match(&normalize("На начало отчетного периода")));
        assert!(end_header().is_match(&normalize("На конец отчетного периода")));
        assert!(!start_header().is_match(&normalize("На конец отчетного периода")));
        assert!(start_header().is_match(&normalize("Yil boshiga")));
        assert!(end_header().is_match(&normalize("Yil oxiriga")));
    }

    #[test]
    fn test_date_format() {
        assert!(is_date_format("mmm-yy"));
        assert!(is_date_format("dd.mm.yyyy"));
        assert!(!is_date_format("#,##0"));
        assert!(!is_date_format("General"));
    }
}
