use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetAnimalDetailsRequest {
    pub animal_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimalDetails {
    pub habitat: &'static str,
    pub diet: &'static str,
}

/// Tool output: `habitat` and `diet` for a known animal, `error` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AnimalLookup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habitat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const ANIMALS: &[(&str, AnimalDetails)] = &[
    (
        "lion",
        AnimalDetails {
            habitat: "savanna",
            diet: "carnivore",
        },
    ),
    (
        "penguin",
        AnimalDetails {
            habitat: "antarctica",
            diet: "piscivore",
        },
    ),
    (
        "giraffe",
        AnimalDetails {
            habitat: "savanna",
            diet: "herbivore",
        },
    ),
];

/// Case-insensitive, otherwise exact.
pub fn find_animal(name: &str) -> Option<&'static AnimalDetails> {
    let name = name.to_lowercase();
    ANIMALS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, details)| details)
}

pub fn lookup(animal_name: &str) -> AnimalLookup {
    match find_animal(animal_name) {
        Some(details) => AnimalLookup {
            habitat: Some(details.habitat.to_string()),
            diet: Some(details.diet.to_string()),
            error: None,
        },
        None => AnimalLookup {
            habitat: None,
            diet: None,
            error: Some(format!("Animal '{}' not found.", animal_name)),
        },
    }
}
