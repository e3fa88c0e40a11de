//! Garment, color, size and quantity recognition for Spanish shop talk.
//!
//! Matching is done on accent-folded lowercase tokens; canonical values keep
//! their accents (`pantalón`).

use ventix_core::domain::intent::ProductFilters;

pub const GARMENTS: [&str; 5] = ["camiseta", "pantalón", "sudadera", "camisa", "falda"];
pub const COLORS: [&str; 7] = ["blanco", "negro", "azul", "verde", "gris", "rojo", "amarillo"];
pub const SIZES: [&str; 5] = ["S", "M", "L", "XL", "XXL"];

const GARMENT_FORMS: &[(&str, &[&str])] = &[
    ("camiseta", &["camiseta", "camisetas", "remera", "remeras", "playera", "playeras", "polo", "polos"]),
    ("pantalón", &["pantalon", "pantalones", "jean", "jeans"]),
    (
        "sudadera",
        &[
            "sudadera", "sudaderas", "buzo", "buzos", "chaqueta", "chaquetas", "campera",
            "camperas", "abrigo", "abrigos",
        ],
    ),
    ("camisa", &["camisa", "camisas"]),
    ("falda", &["falda", "faldas", "pollera", "polleras"]),
];

const COLOR_FORMS: &[(&str, &[&str])] = &[
    ("blanco", &["blanco", "blanca", "blancos", "blancas"]),
    ("negro", &["negro", "negra", "negros", "negras"]),
    ("azul", &["azul", "azules"]),
    ("verde", &["verde", "verdes"]),
    ("gris", &["gris", "grises"]),
    ("rojo", &["rojo", "roja", "rojos", "rojas"]),
    ("amarillo", &["amarillo", "amarilla", "amarillos", "amarillas"]),
];

const SIZE_MARKERS: [&str; 2] = ["talla", "talle"];

/// Lowercases and strips Spanish diacritics.
pub fn fold(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

pub fn tokens(folded: &str) -> Vec<&str> {
    folded.split(|c: char| !c.is_alphanumeric()).filter(|token| !token.is_empty()).collect()
}

fn lookup(table: &[(&'static str, &[&str])], token: &str) -> Option<&'static str> {
    table.iter().find(|(_, forms)| forms.contains(&token)).map(|(canonical, _)| *canonical)
}

pub fn garment_in(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    tokens(&folded).into_iter().find_map(|token| lookup(GARMENT_FORMS, token))
}

pub fn mentions_garment(text: &str) -> bool {
    garment_in(text).is_some()
}

pub fn color_in(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    tokens(&folded).into_iter().find_map(|token| lookup(COLOR_FORMS, token))
}

/// Multi-letter sizes match anywhere; `s`, `m` and `l` only right after
/// `talla`/`talle`, since they are ordinary words otherwise.
pub fn size_in(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    let words = tokens(&folded);
    words.iter().enumerate().find_map(|(index, token)| match *token {
        "xxl" => Some("XXL"),
        "xl" => Some("XL"),
        "s" | "m" | "l" if index > 0 && SIZE_MARKERS.contains(&words[index - 1]) => {
            SIZES.iter().copied().find(|size| size.eq_ignore_ascii_case(token))
        }
        _ => None,
    })
}

/// First positive integer in the text.
pub fn quantity_in(text: &str) -> Option<u32> {
    let folded = fold(text);
    tokens(&folded)
        .into_iter()
        .filter_map(|token| token.parse::<u32>().ok())
        .find(|quantity| *quantity > 0)
}

/// Quantity expressed as an increment, e.g. "20 más".
pub fn increment_in(text: &str) -> Option<u32> {
    let folded = fold(text);
    let words = tokens(&folded);
    words.windows(2).find_map(|pair| match pair {
        [number, "mas"] => number.parse::<u32>().ok().filter(|quantity| *quantity > 0),
        _ => None,
    })
}

pub fn filters_in(text: &str) -> ProductFilters {
    ProductFilters {
        garment_type: garment_in(text).map(str::to_string),
        color: color_in(text).map(str::to_string),
        size: size_in(text).map(str::to_string),
    }
}

/// Normalizes a free-form garment value to its canonical name when known.
pub fn canonical_garment(value: &str) -> Option<String> {
    let folded = fold(value.trim());
    if folded.is_empty() {
        return None;
    }
    Some(lookup(GARMENT_FORMS, &folded).map_or(folded, str::to_string))
}

pub fn canonical_color(value: &str) -> Option<String> {
    let folded = fold(value.trim());
    if folded.is_empty() {
        return None;
    }
    Some(lookup(COLOR_FORMS, &folded).map_or(folded, str::to_string))
}

pub fn canonical_size(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::{
        canonical_garment, color_in, filters_in, fold, garment_in, increment_in,
        quantity_in, size_in,
    };

    #[test]
    fn folding_strips_accents_and_case() {
        assert_eq!(fold("¿Cuánto Pantalón?"), "¿cuanto pantalon?");
    }

    #[test]
    fn recognizes_synonyms_and_plurals() {
        assert_eq!(garment_in("tenés remeras?"), Some("camiseta"));
        assert_eq!(garment_in("unos Jeans negros"), Some("pantalón"));
        assert_eq!(garment_in("busco una campera"), Some("sudadera"));
        assert_eq!(garment_in("una pollera roja"), Some("falda"));
        assert_eq!(garment_in("camisas blancas"), Some("camisa"));
        assert_eq!(garment_in("¿qué colores tenés?"), None);
    }

    #[test]
    fn colors_accept_gender_and_number() {
        assert_eq!(color_in("pantalones AZULES"), Some("azul"));
        assert_eq!(color_in("camisa blanca"), Some("blanco"));
        assert_eq!(color_in("algo lindo"), None);
    }

    #[test]
    fn single_letter_sizes_need_a_marker() {
        assert_eq!(size_in("talla L"), Some("L"));
        assert_eq!(size_in("talle m por favor"), Some("M"));
        assert_eq!(size_in("en XL"), Some("XL"));
        assert_eq!(size_in("la remera"), None);
        assert_eq!(size_in("m de mediano"), None);
    }

    #[test]
    fn quantities_and_increments() {
        assert_eq!(quantity_in("quiero 80 pantalones"), Some(80));
        assert_eq!(quantity_in("0 o 120"), Some(120));
        assert_eq!(quantity_in("quiero pantalones"), None);
        assert_eq!(increment_in("sumale 20 más"), Some(20));
        assert_eq!(increment_in("cambialo a 20"), None);
    }

    #[test]
    fn extracts_full_filter_set() {
        let filters = filters_in("quiero 80 pantalones azules talla L");
        assert_eq!(filters.garment_type.as_deref(), Some("pantalón"));
        assert_eq!(filters.color.as_deref(), Some("azul"));
        assert_eq!(filters.size.as_deref(), Some("L"));
    }

    #[test]
    fn canonicalizes_remote_values() {
        assert_eq!(canonical_garment("Pantalones").as_deref(), Some("pantalón"));
        assert_eq!(canonical_garment("pantalón").as_deref(), Some("pantalón"));
        assert_eq!(canonical_garment("gorro").as_deref(), Some("gorro"));
        assert_eq!(canonical_garment("  "), None);
    }
}
