//! Starter files written by `hyperdag init`.
//!
//! The template declares a small two-input binary classifier whose dense
//! tower is searchable, plus a matching CSV so `fit` and `tune` run out of
//! the box.

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Model file for a project called `name`.
pub fn model_template(name: &str) -> String {
    format!(
        r#"[model]
name = "{name}"
outputs = ["head"]

[compile]
optimizer = "adam"
learning_rate = 0.01
metrics = ["accuracy"]

[search]
objective = "val_loss"
max_trials = 5
epochs = 10
batch_size = 16
validation_split = 0.25

[data]
targets = ["label"]

[input.numeric]
shape = [2]

[input.category]
shape = [1]
dtype = "int64"

[block.embed]
kind = "embedding"
inputs = ["category"]
vocab_size = 4
embedding_dim = [2, 4]

[block.tower]
kind = "dense"
inputs = ["numeric", "embed"]
num_layers = [1, 2]
units = [8, 16, 32]
dropout = 0.0

[block.head]
kind = "classification_head"
inputs = ["tower"]
num_classes = 2
"#
    )
}

/// CSV matching [`model_template`]: `label` is 1 when the two numeric
/// features sum past a threshold that depends on the category.
pub fn data_template(rows: usize) -> String {
    let mut out = String::from("numeric[0],numeric[1],category,label\n");
    for i in 0..rows {
        let a = ((i * 7) % 11) as f64 / 10.0;
        let b = ((i * 5) % 13) as f64 / 12.0;
        let category = i % 4;
        let threshold = 0.6 + 0.2 * category as f64;
        let label = u8::from(a + b > threshold);
        out.push_str(&format!("{:.2},{:.3},{},{}\n", a, b, category, label));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelFile;
    use crate::data::Dataset;
    use crate::graph::assemble;

    #[test]
    fn template_builds() {
        let file = ModelFile::parse(&model_template("demo")).unwrap();
        assert_eq!(file.name, "demo");
        let graph = file.to_graph().unwrap();
        let mut hp = file.hyperparameters();
        let assembly = assemble(&graph, &mut hp).unwrap();
        assert!(hp.space().contains_key("tower/num_layers"));
        assert!(hp.space().contains_key("embed/embedding_dim"));

        let data = Dataset::from_csv(
            &data_template(40),
            &file.input_specs(),
            &file.target_columns(&assembly.plan),
        )
        .unwrap();
        assert_eq!(data.len(), 40);
    }
}
