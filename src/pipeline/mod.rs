pub mod llm; // completion backends and per-task model routing
pub mod ontology; // HPO search and concept graph
pub mod mapping; // survey item → ontology code state machine
