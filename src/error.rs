use custom_error::custom_error;

custom_error! {
/// Everything that can abort building a dataset, a distance matrix or a tree.
#[derive(PartialEq)]
pub Error
    InvalidConstructorArgument{reason: String} = "invalid constructor argument: {reason}",
    InvalidConfig{reason: String} = "invalid configuration: {reason}",
    SourceUnavailable{path: String, reason: String} =
        "sketch source {path} is unavailable: {reason}",
    IncompatibleSketch{genome: String, reference: String, field: String} =
        "sketch of {genome} is incompatible with reference {reference}: {field} differs",
    DistanceComputationFailed{first: String, second: String, reason: String} =
        "distance between {first} and {second} could not be computed: {reason}",
    InsufficientTaxa{count: usize} = "at least 2 genomes are needed to build a tree, got {count}",
    DuplicateTaxon{name: String} = "genome {name} appears more than once",
}

pub type Result<T> = std::result::Result<T, Error>;
