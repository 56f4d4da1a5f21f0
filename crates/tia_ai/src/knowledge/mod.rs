use serde::{Deserialize, Serialize};

/// A curated, in-process agronomy fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeEntry {
    pub id: u32,
    pub topic: String,
    pub content: String,
    pub region: String,
    pub season: String,
    /// Crop or category the entry applies to.
    pub crop: String,
}

impl KnowledgeEntry {
    /// Text the ranker matches against: topic, content and category.
    pub fn searchable_text(&self) -> String {
        format!("{} {} {}", self.topic, self.content, self.crop)
    }
}

/// Read-only lookup over curated entries. Pure; no I/O.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeStore {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeStore {
    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn get(&self, id: u32) -> Option<&KnowledgeEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The field guide shipped with the binary.
    pub fn builtin() -> Self {
        let rows: [(u32, &str, &str, &str, &str); 8] = [
            (
                1,
                "Rice Cultivation",
                "In Bangladesh, rice is typically planted during two main seasons: Aus (April-August) and Aman (July-December). For optimal yield, use high-yielding varieties like BRRI dhan28, BRRI dhan29. Soil should be well-puddled with 2-3 inches of standing water.",
                "Year-round",
                "Rice",
            ),
            (
                2,
                "Sunflower Cultivation",
                "Sunflowers in Bangladesh should be sown during October-November (Rabi season). Plant seeds 1-2 inches deep with 12-18 inches spacing. Requires well-drained soil and full sunlight. Harvest after 90-120 days when back of flower head turns brown.",
                "Rabi (October-March)",
                "Sunflower",
            ),
            (
                3,
                "Pest Management",
                "Common pests in Bangladesh include brown planthopper, stem borer, and leaf folder for rice. Use integrated pest management: biological control with Trichogramma, neem-based pesticides, and resistant varieties. Avoid excessive pesticide use.",
                "All seasons",
                "Rice",
            ),
            (
                4,
                "Fertilizer Application",
                "For rice in Bangladesh: Apply 80-100 kg Urea, 60-80 kg TSP, 40-60 kg MoP per hectare. Split urea application: 1/3 at transplanting, 1/3 at tillering, 1/3 at panicle initiation. Use organic matter like cow dung.",
                "All seasons",
                "Rice",
            ),
            (
                5,
                "Water Management",
                "Rice fields need 2-5 cm standing water during vegetative growth. Drain fields 1-2 weeks before harvest. In dry season, use alternate wetting and drying (AWD) to save water. Monitor water quality for salinity in coastal areas.",
                "All seasons",
                "Rice",
            ),
            (
                6,
                "Vegetable Cultivation",
                "Winter vegetables (October-February): tomato, cabbage, cauliflower, radish. Summer vegetables (March-June): bottle gourd, bitter gourd, okra. Use raised beds for better drainage. Apply compost and balanced fertilizers.",
                "Year-round",
                "Vegetables",
            ),
            (
                7,
                "Climate Adaptation",
                "Bangladesh faces flooding, drought, and salinity. Use flood-tolerant varieties like BRRI dhan51, BRRI dhan52. For drought: BRRI dhan56, BRRI dhan57. For salinity: BRRI dhan47, BRRI dhan61. Practice crop diversification.",
                "All seasons",
                "All crops",
            ),
            (
                8,
                "Soil Health",
                "Bangladesh soils are often deficient in zinc, boron, and sulfur. Test soil pH (optimal 6.0-7.0). Add lime for acidic soils. Use green manure crops like dhaincha. Practice crop rotation to maintain soil fertility.",
                "All seasons",
                "All crops",
            ),
        ];

        let entries = rows
            .iter()
            .map(|(id, topic, content, season, crop)| KnowledgeEntry {
                id: *id,
                topic: topic.to_string(),
                content: content.to_string(),
                region: "Bangladesh".to_string(),
                season: season.to_string(),
                crop: crop.to_string(),
            })
            .collect();
        Self { entries }
    }
}
