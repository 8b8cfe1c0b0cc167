//! Human-readable sandbox name generation.
//!
//! Names are `<adjective>-<surname>` pairs sampled uniformly from the two
//! dictionaries below. The caller supplies an "is taken" predicate; after 20
//! collisions a random four-digit suffix is appended and the result accepted
//! unconditionally. Names never contain underscores, so they are always safe
//! as DNS labels for the reverse proxy.

use rand::Rng;

const MAX_RETRIES: usize = 20;

static ADJECTIVES: &[&str] = &[
    "admiring", "adoring", "affectionate", "agile", "agitated", "airy", "alert", "amazing",
    "ample", "ancient", "angry", "ardent", "artful", "astute", "atomic", "awesome", "balanced",
    "beautiful", "benign", "blazing", "blissful", "bold", "boring", "brave", "breezy", "bright",
    "brisk", "bubbly", "busy", "calm", "candid", "capable", "careful", "charming", "cheerful",
    "chill", "civil", "classic", "clever", "compassionate", "competent", "confident", "cool",
    "cosmic", "cozy", "cranky", "crisp", "curious", "daring", "dashing", "dazzling", "deft",
    "determined", "devoted", "diligent", "direct", "distracted", "dreamy", "dynamic", "eager",
    "earnest", "ecstatic", "elastic", "elated", "electric", "elegant", "eloquent", "emerald",
    "endless", "epic", "exciting", "fabled", "fair", "faithful", "famous", "fancy", "fearless",
    "fervent", "festive", "fiery", "flamboyant", "fleet", "fluent", "focused", "fond", "formal",
    "frank", "fresh", "friendly", "frosty", "funny", "gallant", "gentle", "genuine", "gifted",
    "glad", "gleaming", "glowing", "golden", "goofy", "graceful", "gracious", "grand", "great",
    "handy", "happy", "hardcore", "hearty", "helpful", "heroic", "heuristic", "honest",
    "hopeful", "humble", "hungry", "iconic", "ideal", "immense", "infallible", "inspiring",
    "intelligent", "intense", "interesting", "intrepid", "inventive", "jolly", "jovial",
    "joyful", "keen", "kind", "laughing", "lively", "loving", "loyal", "lucid", "lunar",
    "magical", "majestic", "mellow", "merry", "mighty", "mindful", "modest", "musing",
    "mystifying", "naughty", "neat", "nervous", "nice", "nifty", "noble", "nostalgic", "novel",
    "objective", "optimistic", "patient", "peaceful", "pedantic", "pensive", "placid",
    "playful", "plucky", "poised", "polite", "practical", "priceless", "proud", "pure",
    "quick", "quiet", "quirky", "quizzical", "radiant", "rapid", "rare", "ready", "recursing",
    "refined", "regal", "relaxed", "reverent", "robust", "romantic", "rosy", "rustic", "savvy",
    "secure", "sensible", "serene", "sharp", "silly", "sincere", "sleepy", "smart", "smooth",
    "snappy", "solar", "solid", "sound", "sparkling", "spirited", "spry", "stable", "stellar",
    "stoic", "strange", "striking", "strong", "sturdy", "subtle", "sunny", "supreme",
    "suspicious", "sweet", "swift", "tender", "thirsty", "tidy", "timely", "tranquil", "true",
    "trusting", "trusty", "unruffled", "upbeat", "valiant", "vast", "vibrant", "vigilant",
    "vigorous", "vivid", "warm", "wise", "witty", "wizardly", "wonderful", "youthful",
    "zealous", "zen", "zesty",
];

static SURNAMES: &[&str] = &[
    "agnesi", "albattani", "allen", "almeida", "antonelli", "archimedes", "ardinghelli",
    "aryabhata", "austin", "babbage", "banach", "banzai", "bardeen", "bartik", "bassi",
    "beaver", "bell", "benz", "bhabha", "bhaskara", "black", "blackburn", "blackwell", "bohr",
    "booth", "borg", "bose", "bouman", "boyd", "brahmagupta", "brattain", "brown", "buck",
    "burnell", "cannon", "carson", "cartwright", "carver", "cerf", "chandrasekhar",
    "chaplygin", "chatelet", "chatterjee", "chaum", "chebyshev", "clarke", "cohen", "colden",
    "cori", "cray", "curie", "curran", "darwin", "davinci", "dewdney", "dhawan", "diffie",
    "dijkstra", "dirac", "driscoll", "dubinsky", "easley", "edison", "einstein", "elbakyan",
    "elgamal", "elion", "ellis", "engelbart", "euclid", "euler", "faraday", "feistel",
    "fermat", "fermi", "feynman", "franklin", "gagarin", "galileo", "galois", "ganguly",
    "gates", "gauss", "germain", "goldberg", "goldstine", "goldwasser", "golick", "goodall",
    "gould", "greider", "grothendieck", "haibt", "hamilton", "haslett", "hawking",
    "heisenberg", "hellman", "hermann", "herschel", "hertz", "heyrovsky", "hodgkin",
    "hofstadter", "hoover", "hopper", "hugle", "hypatia", "ishizaka", "jackson", "jang",
    "jemison", "jennings", "jepsen", "johnson", "joliot", "jones", "kalam", "kapitsa", "kare",
    "keldysh", "keller", "kepler", "khayyam", "khorana", "kilby", "kirch", "knuth",
    "kowalevski", "lalande", "lamarr", "lamport", "leakey", "leavitt", "lederberg", "lehmann",
    "lewin", "lichterman", "liskov", "lovelace", "lumiere", "mahavira", "margulis",
    "matsumoto", "maxwell", "mayer", "mccarthy", "mcclintock", "mclaren", "mclean", "mcnulty",
    "meitner", "mendel", "mendeleev", "meninsky", "merkle", "mestorf", "mirzakhani",
    "montalcini", "moore", "morse", "moser", "murdock", "napier", "nash", "neumann", "newton",
    "nightingale", "nobel", "noether", "northcutt", "noyce", "panini", "pare", "pascal",
    "pasteur", "payne", "perlman", "pike", "poincare", "poitras", "proskuriakova", "ptolemy",
    "raman", "ramanujan", "rhodes", "ride", "ritchie", "robinson", "roentgen", "rosalind",
    "rubin", "saha", "sammet", "sanderson", "satoshi", "shamir", "shannon", "shaw", "shirley",
    "shockley", "shtern", "sinoussi", "snyder", "solomon", "spence", "stonebraker",
    "sutherland", "swanson", "swartz", "swirles", "taussig", "tereshkova", "tesla", "tharp",
    "thompson", "torvalds", "tu", "turing", "varahamihira", "vaughan", "villani",
    "visvesvaraya", "volhard", "wescoff", "wilbur", "wiles", "williams", "williamson",
    "wilson", "wing", "wozniak", "wright", "wu", "yalow", "yonath", "zhukovsky",
];

fn sample_pair<R: Rng>(rng: &mut R) -> (&'static str, &'static str) {
    loop {
        let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
        let surname = SURNAMES[rng.gen_range(0..SURNAMES.len())];
        // Steve Wozniak is not boring.
        if adjective == "boring" && surname == "wozniak" {
            continue;
        }
        return (adjective, surname);
    }
}

/// Generates a name that the predicate reports as free, falling back to a
/// random numeric suffix after [`MAX_RETRIES`] collisions.
pub fn generate<F>(is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_RETRIES {
        let (adjective, surname) = sample_pair(&mut rng);
        let name = format!("{adjective}-{surname}");
        if !is_taken(&name) {
            return name;
        }
    }
    let (adjective, surname) = sample_pair(&mut rng);
    let suffix: u16 = rng.gen_range(1000..10000);
    format!("{adjective}-{surname}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn dictionaries_are_large_and_dns_safe() {
        assert!(ADJECTIVES.len() >= 200);
        assert!(SURNAMES.len() >= 200);
        for word in ADJECTIVES.iter().chain(SURNAMES.iter()) {
            assert!(!word.contains('_'), "{word} contains an underscore");
            assert!(word.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn generated_names_match_expected_shape() {
        for _ in 0..500 {
            let name = generate(|_| false);
            assert_ne!(name, "boring-wozniak");
            assert!(!name.contains('_'));
            let mut parts = name.splitn(2, '-');
            let adjective = parts.next().unwrap();
            let surname = parts.next().unwrap();
            assert!(ADJECTIVES.contains(&adjective));
            assert!(SURNAMES.contains(&surname));
        }
    }

    #[test]
    fn exhausted_retries_fall_back_to_numeric_suffix() {
        let name = generate(|_| true);
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn respects_taken_predicate() {
        let mut taken = HashSet::new();
        // Mark half the space taken; generation must avoid those names.
        for adjective in ADJECTIVES.iter().take(ADJECTIVES.len() / 2) {
            for surname in SURNAMES.iter() {
                taken.insert(format!("{adjective}-{surname}"));
            }
        }
        for _ in 0..50 {
            let name = generate(|candidate| taken.contains(candidate));
            assert!(!taken.contains(&name));
        }
    }
}
